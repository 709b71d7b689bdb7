//! Cluster API node group discovery
//!
//! This crate provides:
//! - Synchronized caches of Nodes, Machines, MachineSets, and MachineDeployments
//! - Owner chain resolution with UID-verified lookups
//! - Node to Machine correlation across provider ID, node ref, and annotations
//! - Scaling bounds validation and the [`NodeGroupDirectory`] built on top
//! - Replica count patching through the [`ReplicaScaler`] seam

#![deny(missing_docs)]

pub mod bounds;
pub mod cache;
pub mod config;
pub mod constants;
pub mod correlate;
pub mod directory;
pub mod nodegroup;
pub mod owner;
pub mod scaler;

#[cfg(test)]
mod testing;

pub use bounds::{parse_bounds, ScalingBounds};
pub use cache::{CacheHandle, ClusterCache, LabelSelector, MemoryCache, ResourceCache};
pub use config::AutoscalerConfig;
pub use correlate::MachineCorrelator;
pub use directory::{GroupLookup, NodeGroupDirectory};
pub use nodegroup::{
    Instance, NodeGroup, NodeGroupId, NodeGroupSummary, ScalableKind, ScalableResource,
};
pub use owner::OwnerResolver;
pub use scaler::{KubeReplicaScaler, ReplicaScaler};

#[cfg(test)]
pub use scaler::MockReplicaScaler;
