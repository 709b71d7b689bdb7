//! Centralized constants for the lattice-autoscaler crate
//!
//! Annotation keys here are a wire contract with whoever annotates
//! MachineSets, MachineDeployments, and Nodes; do not change them.

// =============================================================================
// Scaling bounds annotations (MachineSet / MachineDeployment)
// =============================================================================

/// Minimum node group size, base-10 integer
pub const NODE_GROUP_MIN_SIZE_ANNOTATION: &str =
    "cluster.x-k8s.io/cluster-api-autoscaler-node-group-min-size";

/// Maximum node group size, base-10 integer
pub const NODE_GROUP_MAX_SIZE_ANNOTATION: &str =
    "cluster.x-k8s.io/cluster-api-autoscaler-node-group-max-size";

// =============================================================================
// Node annotations
// =============================================================================

/// Back-reference from a Node to the Machine that produced it.
///
/// Value is "namespace/name". A bare "name" is also accepted, in which case
/// the namespace comes from [`CLUSTER_NAMESPACE_ANNOTATION`].
pub const MACHINE_ANNOTATION: &str = "cluster.x-k8s.io/machine";

/// Namespace of the owning cluster, set by CAPI next to [`MACHINE_ANNOTATION`]
pub const CLUSTER_NAMESPACE_ANNOTATION: &str = "cluster.x-k8s.io/cluster-namespace";

// =============================================================================
// Field managers and defaults
// =============================================================================

/// Field manager used when patching replica counts
pub const FIELD_MANAGER: &str = "lattice-autoscaler";

/// Default time allowed for the initial cache sync
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 60;
