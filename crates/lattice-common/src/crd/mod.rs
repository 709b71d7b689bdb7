//! Cluster API resource definitions
//!
//! Typed mirrors of the upstream `cluster.x-k8s.io` resources the node group
//! discovery reads. Only the fields Lattice consumes are modeled; unknown
//! fields are ignored on deserialization.

mod capi;

pub use capi::{
    Machine, MachineDeployment, MachineDeploymentSpec, MachineSet, MachineSetSpec, MachineSpec,
    MachineStatus, CAPI_GROUP,
};
