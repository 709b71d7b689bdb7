//! Node group discovery
//!
//! The directory enumerates every MachineSet and MachineDeployment that
//! qualifies as a node group and answers which group, if any, owns a Node.
//!
//! Scaling bounds are read from the root of each hierarchy only. A MachineSet
//! owned by a live MachineDeployment is represented by that deployment; if the
//! deployment cannot be resolved (deleted, or recreated with a new UID) the
//! MachineSet stands on its own.
//!
//! A root declaring zero replicas is not a node group; scaling up from zero
//! is not supported.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use kube::{Resource, ResourceExt};
use tracing::{debug, warn};

use lattice_common::crd::{MachineDeployment, MachineSet};
use lattice_common::Result;

use crate::cache::{ClusterCache, LabelSelector};
use crate::config::AutoscalerConfig;
use crate::correlate::MachineCorrelator;
use crate::nodegroup::{NodeGroup, NodeGroupId, ScalableKind, ScalableResource};
use crate::owner::{owner_reference_of_kind, OwnerResolver};

/// Outcome of looking up one candidate by identifier
#[derive(Debug)]
pub enum GroupLookup {
    /// No such resource in scope
    NotFound,
    /// The resource exists but is not a node group: no bounds, no room to
    /// scale, zero declared replicas, or represented by its owning
    /// MachineDeployment
    NotScalable,
    /// The resource is a node group
    Scalable(NodeGroup),
}

/// Discovers node groups from the cluster cache
#[derive(Clone, Debug)]
pub struct NodeGroupDirectory {
    cache: ClusterCache,
    config: AutoscalerConfig,
    owners: OwnerResolver,
    correlator: MachineCorrelator,
}

impl NodeGroupDirectory {
    /// Directory over every namespace in `cache`
    pub fn new(cache: ClusterCache) -> Self {
        Self::with_config(cache, AutoscalerConfig::default())
    }

    /// Directory limited to the namespace scope in `config`
    pub fn with_config(cache: ClusterCache, config: AutoscalerConfig) -> Self {
        Self {
            owners: OwnerResolver::new(cache.clone()),
            correlator: MachineCorrelator::new(cache.clone()),
            cache,
            config,
        }
    }

    fn scope(&self) -> Option<&str> {
        self.config.namespace.as_deref()
    }

    /// Root of the hierarchy `machine_set` belongs to
    fn root_of(&self, machine_set: Arc<MachineSet>) -> Result<ScalableResource> {
        let md_kind = MachineDeployment::kind(&());
        if owner_reference_of_kind(machine_set.meta(), &md_kind).is_none() {
            return Ok(ScalableResource::MachineSet(machine_set));
        }

        match self.owners.machine_set_owner(&machine_set)? {
            Some(md) => Ok(ScalableResource::MachineDeployment(md)),
            None => {
                debug!(
                    machine_set = %machine_set.name_any(),
                    "MachineDeployment owner not resolvable, treating MachineSet as root"
                );
                Ok(ScalableResource::MachineSet(machine_set))
            }
        }
    }

    fn candidates(&self) -> Result<Vec<ScalableResource>> {
        let everything = LabelSelector::everything();
        let mut candidates = Vec::new();

        for machine_set in self.cache.machine_sets.list(self.scope(), &everything) {
            if let root @ ScalableResource::MachineSet(_) = self.root_of(machine_set)? {
                candidates.push(root);
            }
        }
        candidates.extend(
            self.cache
                .machine_deployments
                .list(self.scope(), &everything)
                .into_iter()
                .map(ScalableResource::MachineDeployment),
        );

        Ok(candidates)
    }

    /// Group for `resource` if its bounds are present and leave room to scale.
    /// Misconfigured bounds are an error.
    fn scalable_group(&self, resource: ScalableResource) -> Result<Option<NodeGroup>> {
        match resource.bounds()? {
            Some(bounds) if bounds.has_room() && resource.replicas() > 0 => {
                Ok(Some(NodeGroup::new(resource, bounds, self.cache.clone())?))
            }
            _ => Ok(None),
        }
    }

    /// Every node group in scope, sorted by identifier.
    ///
    /// Any misconfigured candidate fails the whole call; callers never get a
    /// partial list.
    pub fn list_node_groups(&self) -> Result<Vec<NodeGroup>> {
        let mut groups = Vec::new();
        for candidate in self.candidates()? {
            if let Some(group) = self.scalable_group(candidate)? {
                groups.push(group);
            }
        }
        groups.sort_by(|a, b| a.id().cmp(b.id()));

        debug!(count = groups.len(), "Listed node groups");
        Ok(groups)
    }

    /// The node group owning `node`, if any.
    ///
    /// Unmanaged nodes, unresolvable owners, and groups without usable bounds
    /// all yield `Ok(None)`. Misconfigured bounds are logged rather than
    /// returned. Only a malformed key annotation is an error.
    pub fn node_group_for_node(&self, node: &Node) -> Result<Option<NodeGroup>> {
        let Some(machine) = self.correlator.machine_for_node(node)? else {
            debug!(node = %node.name_any(), "No machine for node");
            return Ok(None);
        };
        if !self.config.in_scope(&machine.namespace().unwrap_or_default()) {
            return Ok(None);
        }

        let Some(machine_set) = self.owners.machine_owner(&machine)? else {
            debug!(
                node = %node.name_any(),
                machine = %machine.name_any(),
                "Machine has no resolvable MachineSet owner"
            );
            return Ok(None);
        };

        let root = self.root_of(machine_set)?;
        match self.scalable_group(root) {
            Ok(group) => Ok(group),
            Err(e) if e.is_misconfiguration() => {
                warn!(
                    node = %node.name_any(),
                    error = %e,
                    "Ignoring node group with invalid scaling bounds"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Look up one candidate, distinguishing "missing" from "not scalable".
    ///
    /// Misconfigured bounds are an error.
    pub fn lookup(&self, id: &NodeGroupId) -> Result<GroupLookup> {
        if !self.config.in_scope(&id.namespace) {
            return Ok(GroupLookup::NotFound);
        }

        let resource = match id.kind {
            ScalableKind::MachineSet => {
                let Some(machine_set) = self.cache.machine_sets.get(Some(&id.namespace), &id.name)
                else {
                    return Ok(GroupLookup::NotFound);
                };
                match self.root_of(machine_set)? {
                    root @ ScalableResource::MachineSet(_) => root,
                    ScalableResource::MachineDeployment(_) => return Ok(GroupLookup::NotScalable),
                }
            }
            ScalableKind::MachineDeployment => {
                let Some(md) = self
                    .cache
                    .machine_deployments
                    .get(Some(&id.namespace), &id.name)
                else {
                    return Ok(GroupLookup::NotFound);
                };
                ScalableResource::MachineDeployment(md)
            }
        };

        Ok(match self.scalable_group(resource)? {
            Some(group) => GroupLookup::Scalable(group),
            None => GroupLookup::NotScalable,
        })
    }
}
