//! Node groups
//!
//! A [`NodeGroup`] is derived on demand from a MachineSet or MachineDeployment
//! that carries valid scaling bounds. It is never stored; every query builds
//! fresh groups from the current cache contents.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use tracing::debug;

use lattice_common::crd::{Machine, MachineDeployment, MachineSet};
use lattice_common::kube_utils::NamespacedName;
use lattice_common::{Error, Result};

use crate::bounds::{parse_bounds, ScalingBounds};
use crate::cache::{ClusterCache, LabelSelector};
use crate::correlate::{node_provider_id, MachineCorrelator};
use crate::owner::is_owned_by;
use crate::scaler::ReplicaScaler;

// =============================================================================
// Identity
// =============================================================================

/// Kind of resource a node group is rooted at
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ScalableKind {
    /// Standalone MachineSet
    MachineSet,
    /// MachineDeployment, owning one or more MachineSets
    MachineDeployment,
}

impl ScalableKind {
    /// Kubernetes kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalableKind::MachineSet => "MachineSet",
            ScalableKind::MachineDeployment => "MachineDeployment",
        }
    }
}

impl fmt::Display for ScalableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScalableKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MachineSet" => Ok(ScalableKind::MachineSet),
            "MachineDeployment" => Ok(ScalableKind::MachineDeployment),
            other => Err(Error::invalid_key(
                other,
                "expected MachineSet or MachineDeployment",
            )),
        }
    }
}

/// Identity of a node group: root kind, namespace, and name.
///
/// Rendered and parsed as `Kind/namespace/name`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeGroupId {
    /// Root resource kind
    pub kind: ScalableKind,
    /// Root resource namespace
    pub namespace: String,
    /// Root resource name
    pub name: String,
}

impl NodeGroupId {
    /// Build an identifier from its parts
    pub fn new(kind: ScalableKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn from_meta(kind: ScalableKind, meta: &ObjectMeta) -> Result<Self> {
        let key = NamespacedName::from_meta(meta)?;
        Ok(Self::new(kind, key.namespace, key.name))
    }
}

impl fmt::Display for NodeGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

impl FromStr for NodeGroupId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        let [kind, namespace, name] = parts.as_slice() else {
            return Err(Error::invalid_key(s, "expected \"Kind/namespace/name\""));
        };
        if namespace.is_empty() || name.is_empty() {
            return Err(Error::invalid_key(s, "namespace and name must not be empty"));
        }
        let kind = kind
            .parse::<ScalableKind>()
            .map_err(|_| Error::invalid_key(s, "expected MachineSet or MachineDeployment kind"))?;
        Ok(Self::new(kind, *namespace, *name))
    }
}

// =============================================================================
// Root resource
// =============================================================================

/// The root of a group hierarchy
#[derive(Clone, Debug)]
pub enum ScalableResource {
    /// Group rooted at a MachineSet, owning Machines directly
    MachineSet(Arc<MachineSet>),
    /// Group rooted at a MachineDeployment, owning Machines through MachineSets
    MachineDeployment(Arc<MachineDeployment>),
}

impl ScalableResource {
    /// Root kind
    pub fn kind(&self) -> ScalableKind {
        match self {
            ScalableResource::MachineSet(_) => ScalableKind::MachineSet,
            ScalableResource::MachineDeployment(_) => ScalableKind::MachineDeployment,
        }
    }

    /// Root metadata
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ScalableResource::MachineSet(ms) => ms.meta(),
            ScalableResource::MachineDeployment(md) => md.meta(),
        }
    }

    /// Declared replica count
    pub fn replicas(&self) -> i32 {
        match self {
            ScalableResource::MachineSet(ms) => ms.replicas(),
            ScalableResource::MachineDeployment(md) => md.replicas(),
        }
    }

    /// Node group identifier for this root
    pub fn id(&self) -> Result<NodeGroupId> {
        NodeGroupId::from_meta(self.kind(), self.meta())
    }

    /// Scaling bounds read from the root's annotations
    pub fn bounds(&self) -> Result<Option<ScalingBounds>> {
        let resource = self.id()?.to_string();
        let annotations = self.meta().annotations.clone().unwrap_or_default();
        parse_bounds(&resource, &annotations)
    }
}

// =============================================================================
// Node group
// =============================================================================

/// A member of a node group
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Instance {
    /// Provider ID of the member
    pub id: String,
    /// Name of the linked Node, when it is in the cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

/// Serializable snapshot of a node group
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupSummary {
    /// `Kind/namespace/name`
    pub id: String,
    /// Root kind
    pub kind: ScalableKind,
    /// Root namespace
    pub namespace: String,
    /// Root name
    pub name: String,
    /// Minimum size
    pub min_size: i32,
    /// Maximum size
    pub max_size: i32,
    /// Declared replica count
    pub size: i32,
    /// Current members
    pub members: Vec<Instance>,
}

/// A scalable group of nodes with validated bounds
#[derive(Clone, Debug)]
pub struct NodeGroup {
    id: NodeGroupId,
    resource: ScalableResource,
    bounds: ScalingBounds,
    cache: ClusterCache,
    correlator: MachineCorrelator,
}

impl NodeGroup {
    /// Build a group from a root resource and its already validated bounds
    pub fn new(
        resource: ScalableResource,
        bounds: ScalingBounds,
        cache: ClusterCache,
    ) -> Result<Self> {
        Ok(Self {
            id: resource.id()?,
            correlator: MachineCorrelator::new(cache.clone()),
            resource,
            bounds,
            cache,
        })
    }

    /// Group identifier
    pub fn id(&self) -> &NodeGroupId {
        &self.id
    }

    /// Root resource
    pub fn resource(&self) -> &ScalableResource {
        &self.resource
    }

    /// Minimum size
    pub fn min_size(&self) -> i32 {
        self.bounds.min
    }

    /// Maximum size
    pub fn max_size(&self) -> i32 {
        self.bounds.max
    }

    /// Declared (desired) replica count of the root resource
    pub fn size(&self) -> i32 {
        self.resource.replicas()
    }

    /// One-line description
    pub fn debug(&self) -> String {
        format!(
            "{} (min: {}, max: {}, replicas: {})",
            self.id,
            self.min_size(),
            self.max_size(),
            self.size()
        )
    }

    fn owned_machines(&self, machine_set: &MachineSet) -> Vec<Arc<Machine>> {
        self.cache
            .machines
            .list(Some(&self.id.namespace), &LabelSelector::everything())
            .into_iter()
            .filter(|m| is_owned_by(m.meta(), machine_set))
            .collect()
    }

    /// Machines owned by this group, sorted by name
    pub fn machines(&self) -> Vec<Arc<Machine>> {
        let mut machines = match &self.resource {
            ScalableResource::MachineSet(ms) => self.owned_machines(ms),
            ScalableResource::MachineDeployment(md) => self
                .cache
                .machine_sets
                .list(Some(&self.id.namespace), &LabelSelector::everything())
                .into_iter()
                .filter(|ms| is_owned_by(ms.meta(), md.as_ref()))
                .flat_map(|ms| self.owned_machines(&ms))
                .collect(),
        };
        machines.sort_by_key(|m| m.name_any());
        machines
    }

    /// Instances backing this group.
    ///
    /// Machines without a provider ID or a linked Node that has one are still
    /// provisioning and are left out.
    pub fn members(&self) -> Vec<Instance> {
        self.machines()
            .iter()
            .filter_map(|machine| self.instance_for(machine))
            .collect()
    }

    fn instance_for(&self, machine: &Machine) -> Option<Instance> {
        if let Some(provider_id) = machine.provider_id() {
            let node_name = self
                .correlator
                .find_node_by_provider_id(provider_id)
                .map(|n| n.name_any());
            return Some(Instance {
                id: provider_id.to_string(),
                node_name,
            });
        }

        let Some(node_name) = machine.node_ref_name() else {
            debug!(
                node_group = %self.id,
                machine = %machine.name_any(),
                "Machine not linked to a node yet"
            );
            return None;
        };
        let Some(node) = self.correlator.find_node_by_name(node_name) else {
            debug!(
                node_group = %self.id,
                machine = %machine.name_any(),
                node = node_name,
                "Referenced node not in cache"
            );
            return None;
        };
        let Some(provider_id) = node_provider_id(&node) else {
            debug!(node_group = %self.id, node = node_name, "Node has no provider ID yet");
            return None;
        };

        Some(Instance {
            id: provider_id.to_string(),
            node_name: Some(node_name.to_string()),
        })
    }

    /// Serializable snapshot including current members
    pub fn summary(&self) -> NodeGroupSummary {
        NodeGroupSummary {
            id: self.id.to_string(),
            kind: self.id.kind,
            namespace: self.id.namespace.clone(),
            name: self.id.name.clone(),
            min_size: self.min_size(),
            max_size: self.max_size(),
            size: self.size(),
            members: self.members(),
        }
    }

    // =========================================================================
    // Resize
    // =========================================================================

    /// Set the declared size to `replicas`, which must lie within the bounds
    pub async fn set_size(&self, scaler: &dyn ReplicaScaler, replicas: i32) -> Result<()> {
        if !self.bounds.contains(replicas) {
            return Err(Error::scale(
                self.id.to_string(),
                format!(
                    "size {} outside bounds [{}, {}]",
                    replicas,
                    self.min_size(),
                    self.max_size()
                ),
            ));
        }
        scaler.set_replicas(&self.id, replicas).await
    }

    fn shifted_size(&self, delta: i32) -> Result<i32> {
        self.size().checked_add(delta).ok_or_else(|| {
            Error::scale(self.id.to_string(), format!("size delta {} overflows", delta))
        })
    }

    /// Grow the group by `delta` nodes
    pub async fn increase_size(&self, scaler: &dyn ReplicaScaler, delta: i32) -> Result<()> {
        if delta <= 0 {
            return Err(Error::scale(
                self.id.to_string(),
                format!("size increase must be positive, got {}", delta),
            ));
        }
        let target = self.shifted_size(delta)?;
        if target > self.max_size() {
            return Err(Error::scale(
                self.id.to_string(),
                format!(
                    "size increase too large: desired {} exceeds max {}",
                    target,
                    self.max_size()
                ),
            ));
        }
        self.set_size(scaler, target).await
    }

    /// Lower the declared size by `-delta` without removing registered nodes.
    ///
    /// Only shrinks the target for nodes that have not joined yet.
    pub async fn decrease_target_size(
        &self,
        scaler: &dyn ReplicaScaler,
        delta: i32,
    ) -> Result<()> {
        if delta >= 0 {
            return Err(Error::scale(
                self.id.to_string(),
                format!("size decrease must be negative, got {}", delta),
            ));
        }
        let target = self.shifted_size(delta)?;
        let members = self.members().len();
        if usize::try_from(target).map_or(true, |t| t < members) {
            return Err(Error::scale(
                self.id.to_string(),
                format!(
                    "attempt to delete existing nodes: target {} below {} current members",
                    target, members
                ),
            ));
        }
        self.set_size(scaler, target).await
    }
}
