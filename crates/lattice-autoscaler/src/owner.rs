//! Owner chain resolution
//!
//! Owner references are identity pointers, not graph edges. Every hop looks
//! the owner up in the cache and confirms name, kind, and UID all agree, so a
//! deleted-and-recreated owner with the same name is never mistaken for the
//! original.

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::Resource;
use tracing::debug;

use lattice_common::crd::{Machine, MachineDeployment, MachineSet};
use lattice_common::kube_utils::NamespacedName;
use lattice_common::Result;

use crate::cache::{ClusterCache, ResourceCache};

/// First owner reference whose kind is `kind`
pub fn owner_reference_of_kind<'a>(
    owned: &'a ObjectMeta,
    kind: &str,
) -> Option<&'a OwnerReference> {
    owned
        .owner_references
        .as_ref()?
        .iter()
        .find(|r| r.kind == kind)
}

/// Resolve the owner of kind `K` recorded on `owned`, one hop.
///
/// Returns `Ok(None)` when there is no reference of that kind, the owner is
/// not in the cache, or its UID differs from the reference. Only a reference
/// that cannot form a valid "namespace/name" key is an error.
pub fn resolve_owner<K>(
    owned: &ObjectMeta,
    owners: &dyn ResourceCache<K>,
) -> Result<Option<Arc<K>>>
where
    K: Resource<DynamicType = ()>,
{
    let kind = K::kind(&());
    let Some(owner_ref) = owner_reference_of_kind(owned, &kind) else {
        return Ok(None);
    };

    let raw_key = match owned.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, owner_ref.name),
        _ => owner_ref.name.clone(),
    };
    let key = NamespacedName::parse(&raw_key)?;

    let Some(candidate) = owners.get(key.namespace(), &key.name) else {
        debug!(owner = %key, kind = %kind, "Owner not in cache");
        return Ok(None);
    };

    if candidate.meta().uid.as_deref() != Some(owner_ref.uid.as_str()) {
        debug!(
            owner = %key,
            kind = %kind,
            expected_uid = %owner_ref.uid,
            actual_uid = ?candidate.meta().uid,
            "Owner UID mismatch"
        );
        return Ok(None);
    }

    Ok(Some(candidate))
}

/// Whether `owned` records `owner` as its owner of kind `K`.
///
/// Same matching rule as [`resolve_owner`], checked against a known owner
/// instead of a cache lookup.
pub fn is_owned_by<K>(owned: &ObjectMeta, owner: &K) -> bool
where
    K: Resource<DynamicType = ()>,
{
    let owner_meta = owner.meta();
    let Some(owner_ref) = owner_reference_of_kind(owned, &K::kind(&())) else {
        return false;
    };

    owned.namespace == owner_meta.namespace
        && owner_meta.name.as_deref() == Some(owner_ref.name.as_str())
        && owner_meta.uid.as_deref() == Some(owner_ref.uid.as_str())
}

/// Resolves Machine -> MachineSet -> MachineDeployment, one hop per call
#[derive(Clone, Debug)]
pub struct OwnerResolver {
    cache: ClusterCache,
}

impl OwnerResolver {
    /// Create a resolver reading from `cache`
    pub fn new(cache: ClusterCache) -> Self {
        Self { cache }
    }

    /// The MachineSet that owns `machine`
    pub fn machine_owner(&self, machine: &Machine) -> Result<Option<Arc<MachineSet>>> {
        resolve_owner(machine.meta(), self.cache.machine_sets.as_ref())
    }

    /// The MachineDeployment that owns `machine_set`
    pub fn machine_set_owner(
        &self,
        machine_set: &MachineSet,
    ) -> Result<Option<Arc<MachineDeployment>>> {
        resolve_owner(machine_set.meta(), self.cache.machine_deployments.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use kube::ResourceExt;

    fn ten_node_bounds() -> std::collections::BTreeMap<String, String> {
        bounds("1", "10")
    }

    /// Story: a Machine resolves to the MachineSet named in its owner reference
    /// only while that exact MachineSet (same UID) is in the cache.
    #[test]
    fn story_machine_owner_requires_identity_match() {
        let config = machine_set_config(TEST_NAMESPACE, 1, ten_node_bounds());
        let cluster = TestCluster::new(&[&config]);
        let resolver = OwnerResolver::new(cluster.cache());

        // Lookup succeeds
        let owner = resolver
            .machine_owner(&config.machines[0])
            .unwrap()
            .expect("machine should resolve to its MachineSet");
        assert_eq!(owner.name_any(), "machineset-0");

        // UID mismatch: same name, different identity
        let mut stale = config.machines[0].clone();
        stale.metadata.owner_references.as_mut().unwrap()[0].uid =
            "does-not-match-machineset".to_string();
        assert!(resolver.machine_owner(&stale).unwrap().is_none());

        // MachineSet deleted from the cache
        cluster
            .machine_sets
            .delete(Some(TEST_NAMESPACE), "machineset-0");
        assert!(resolver.machine_owner(&config.machines[0]).unwrap().is_none());
    }

    #[test]
    fn test_machine_without_owner_references() {
        let config = machine_set_config(TEST_NAMESPACE, 1, ten_node_bounds());
        let cluster = TestCluster::new(&[&config]);
        let resolver = OwnerResolver::new(cluster.cache());

        let mut orphan = config.machines[0].clone();
        orphan.metadata.owner_references = None;
        assert!(resolver.machine_owner(&orphan).unwrap().is_none());

        orphan.metadata.owner_references = Some(vec![]);
        assert!(resolver.machine_owner(&orphan).unwrap().is_none());
    }

    #[test]
    fn test_only_first_reference_of_kind_is_considered() {
        let config = machine_set_config(TEST_NAMESPACE, 1, ten_node_bounds());
        let cluster = TestCluster::new(&[&config]);
        let resolver = OwnerResolver::new(cluster.cache());

        let mut machine = config.machines[0].clone();
        let good = owner_ref(&config.machine_set);
        let bad = OwnerReference {
            uid: "other".to_string(),
            ..good.clone()
        };
        machine.metadata.owner_references = Some(vec![bad, good]);
        assert!(resolver.machine_owner(&machine).unwrap().is_none());
    }

    #[test]
    fn test_other_owner_kinds_are_ignored() {
        let config = machine_set_config(TEST_NAMESPACE, 1, ten_node_bounds());
        let cluster = TestCluster::new(&[&config]);
        let resolver = OwnerResolver::new(cluster.cache());

        let mut machine = config.machines[0].clone();
        let mut wrong_kind = owner_ref(&config.machine_set);
        wrong_kind.kind = "KubeadmControlPlane".to_string();
        machine.metadata.owner_references = Some(vec![wrong_kind]);
        assert!(resolver.machine_owner(&machine).unwrap().is_none());
    }

    #[test]
    fn test_malformed_owner_name_is_an_error() {
        let config = machine_set_config(TEST_NAMESPACE, 1, ten_node_bounds());
        let cluster = TestCluster::new(&[&config]);
        let resolver = OwnerResolver::new(cluster.cache());

        let mut machine = config.machines[0].clone();
        machine.metadata.owner_references.as_mut().unwrap()[0].name = "a/b".to_string();
        assert!(resolver.machine_owner(&machine).is_err());
    }

    #[test]
    fn test_machine_set_owner_two_hops() {
        let config = machine_deployment_config(TEST_NAMESPACE, 2, ten_node_bounds());
        let cluster = TestCluster::new(&[&config]);
        let resolver = OwnerResolver::new(cluster.cache());

        let ms = resolver
            .machine_owner(&config.machines[1])
            .unwrap()
            .expect("machine set");
        let md = resolver
            .machine_set_owner(&ms)
            .unwrap()
            .expect("machine deployment");
        assert_eq!(md.name_any(), "machinedeployment-0");

        // A MachineSet-rooted config has no deployment owner
        let standalone = machine_set_config(TEST_NAMESPACE, 1, ten_node_bounds());
        assert!(resolver
            .machine_set_owner(&standalone.machine_set)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_is_owned_by() {
        let config = machine_deployment_config(TEST_NAMESPACE, 1, ten_node_bounds());
        let md = config.machine_deployment.as_ref().unwrap();

        assert!(is_owned_by(config.machines[0].meta(), &config.machine_set));
        assert!(is_owned_by(config.machine_set.meta(), md));

        let mut recreated = config.machine_set.clone();
        recreated.metadata.uid = Some("new-uid".to_string());
        assert!(!is_owned_by(config.machines[0].meta(), &recreated));

        let mut elsewhere = config.machine_set.clone();
        elsewhere.metadata.namespace = Some("other".to_string());
        assert!(!is_owned_by(config.machines[0].meta(), &elsewhere));
    }
}
