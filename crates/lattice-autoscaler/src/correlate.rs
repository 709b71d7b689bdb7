//! Node to Machine correlation
//!
//! A Node and its Machine are linked by up to three signals, each populated at
//! a different point during provisioning: the provider ID (on both sides), the
//! Machine's `status.nodeRef`, and the Node's machine annotation. Every lookup
//! here walks those signals in a fixed order and treats a missing one as "try
//! the next", never as an error.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::debug;

use lattice_common::crd::Machine;
use lattice_common::kube_utils::NamespacedName;
use lattice_common::Result;

use crate::cache::{ClusterCache, LabelSelector};
use crate::constants::{CLUSTER_NAMESPACE_ANNOTATION, MACHINE_ANNOTATION};

/// Provider ID assigned to a Node, if any
pub fn node_provider_id(node: &Node) -> Option<&str> {
    node.spec
        .as_ref()?
        .provider_id
        .as_deref()
        .filter(|id| !id.is_empty())
}

/// Key of the Machine a Node's annotations point at.
///
/// A bare machine name takes its namespace from the cluster namespace
/// annotation. Errors only when the annotation value is not a valid key.
pub fn machine_key_for_node(node: &Node) -> Result<Option<NamespacedName>> {
    let annotations = node.annotations();
    let Some(value) = annotations
        .get(MACHINE_ANNOTATION)
        .filter(|v| !v.is_empty())
    else {
        return Ok(None);
    };

    let mut key = NamespacedName::parse(value)?;
    if key.namespace.is_empty() {
        if let Some(ns) = annotations.get(CLUSTER_NAMESPACE_ANNOTATION) {
            key.namespace = ns.clone();
        }
    }
    Ok(Some(key))
}

/// Read-only correlation between Nodes and Machines
#[derive(Clone, Debug)]
pub struct MachineCorrelator {
    cache: ClusterCache,
}

impl MachineCorrelator {
    /// Create a correlator reading from `cache`
    pub fn new(cache: ClusterCache) -> Self {
        Self { cache }
    }

    /// Direct lookup of a Machine by "namespace/name"
    pub fn find_machine(&self, key: &str) -> Result<Option<Arc<Machine>>> {
        let key = NamespacedName::parse(key)?;
        Ok(self.machine_by_key(&key))
    }

    fn machine_by_key(&self, key: &NamespacedName) -> Option<Arc<Machine>> {
        let machine = self.cache.machines.get(key.namespace(), &key.name);
        if machine.is_none() {
            debug!(machine = %key, "Machine not in cache");
        }
        machine
    }

    /// Machine carrying `provider_id`.
    ///
    /// Scans Machines first. When none carries the ID yet, falls back to the
    /// Node with that ID and follows its machine annotation.
    pub fn find_machine_by_provider_id(&self, provider_id: &str) -> Result<Option<Arc<Machine>>> {
        if provider_id.is_empty() {
            return Ok(None);
        }

        let by_spec = self
            .cache
            .machines
            .list(None, &LabelSelector::everything())
            .into_iter()
            .find(|m| m.provider_id() == Some(provider_id));
        if by_spec.is_some() {
            return Ok(by_spec);
        }

        let Some(node) = self.find_node_by_provider_id(provider_id) else {
            debug!(provider_id, "No machine or node with provider ID");
            return Ok(None);
        };
        let Some(key) = machine_key_for_node(&node)? else {
            debug!(
                provider_id,
                node = %node.name_any(),
                "Node has no machine annotation"
            );
            return Ok(None);
        };
        Ok(self.machine_by_key(&key))
    }

    /// Direct lookup of a Node by name
    pub fn find_node_by_name(&self, name: &str) -> Option<Arc<Node>> {
        self.cache.nodes.get(None, name)
    }

    /// Node whose `spec.providerID` equals `provider_id`
    pub fn find_node_by_provider_id(&self, provider_id: &str) -> Option<Arc<Node>> {
        if provider_id.is_empty() {
            return None;
        }
        self.cache
            .nodes
            .list(None, &LabelSelector::everything())
            .into_iter()
            .find(|n| node_provider_id(n) == Some(provider_id))
    }

    /// Machine that produced `node`.
    ///
    /// Uses the Node's provider ID when it has one, otherwise its machine
    /// annotation.
    pub fn machine_for_node(&self, node: &Node) -> Result<Option<Arc<Machine>>> {
        if let Some(provider_id) = node_provider_id(node) {
            return self.find_machine_by_provider_id(provider_id);
        }

        match machine_key_for_node(node)? {
            Some(key) => Ok(self.machine_by_key(&key)),
            None => Ok(None),
        }
    }

    /// Node linked to `machine`, by provider ID then by node ref
    pub fn node_for_machine(&self, machine: &Machine) -> Option<Arc<Node>> {
        if let Some(provider_id) = machine.provider_id() {
            return self.find_node_by_provider_id(provider_id);
        }
        self.find_node_by_name(machine.node_ref_name()?)
    }
}
