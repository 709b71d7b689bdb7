//! Machine, MachineSet and MachineDeployment
//!
//! A MachineDeployment owns MachineSets, a MachineSet owns Machines, and a
//! Machine produces one Node. Ownership is recorded with standard
//! `metadata.ownerReferences`; the Machine links to its Node through
//! `spec.providerID` and `status.nodeRef`, both populated asynchronously.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster API group
pub const CAPI_GROUP: &str = "cluster.x-k8s.io";

/// Machine is the declarative descriptor for a single Node.
///
/// Example:
/// ```yaml
/// apiVersion: cluster.x-k8s.io/v1beta1
/// kind: Machine
/// metadata:
///   name: workers-7d9f-abcde
///   namespace: default
///   ownerReferences:
///   - kind: MachineSet
///     name: workers-7d9f
///     uid: 3f0a...
/// spec:
///   clusterName: prod
///   providerID: aws:///us-east-1a/i-0123456789
/// status:
///   nodeRef:
///     kind: Node
///     name: ip-10-0-1-12
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the CAPI Cluster this machine belongs to
    #[serde(default)]
    pub cluster_name: String,

    /// Infrastructure provider identifier, set once provisioning completes
    #[serde(
        rename = "providerID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub provider_id: Option<String>,
}

/// Observed state of a Machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Reference to the Node once one has joined the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<ObjectReference>,

    /// Lifecycle phase (Pending, Provisioning, Provisioned, Running, Deleting, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// MachineSet keeps a declared number of Machines running.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MachineSet",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    /// Name of the CAPI Cluster this set belongs to
    #[serde(default)]
    pub cluster_name: String,

    /// Declared number of Machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// MachineDeployment rolls out MachineSets.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MachineDeployment",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentSpec {
    /// Name of the CAPI Cluster this deployment belongs to
    #[serde(default)]
    pub cluster_name: String,

    /// Declared number of Machines across the owned MachineSets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

impl Machine {
    /// Provider ID, if set and non-empty
    pub fn provider_id(&self) -> Option<&str> {
        self.spec.provider_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Name of the linked Node from `status.nodeRef`, if set
    pub fn node_ref_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.node_ref.as_ref())
            .and_then(|r| r.name.as_deref())
            .filter(|n| !n.is_empty())
    }
}

impl MachineSet {
    /// Declared replica count; an unset field counts as zero
    pub fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(0)
    }
}

impl MachineDeployment {
    /// Declared replica count; an unset field counts as zero
    pub fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(0)
    }
}
