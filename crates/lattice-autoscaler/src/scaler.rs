//! Replica count mutation
//!
//! The discovery core never writes to the API server itself. Resizes go
//! through [`ReplicaScaler`] so tests can mock it and embedders can route the
//! write elsewhere.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use lattice_common::crd::{MachineDeployment, MachineSet};
use lattice_common::Error;

use crate::constants::FIELD_MANAGER;
use crate::nodegroup::{NodeGroupId, ScalableKind};

/// Sets the declared replica count of a node group's root resource
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReplicaScaler: Send + Sync {
    /// Set `spec.replicas` on the resource identified by `id`
    async fn set_replicas(&self, id: &NodeGroupId, replicas: i32) -> Result<(), Error>;
}

/// Merge patch body that sets `spec.replicas`
pub fn build_replicas_patch(replicas: i32) -> serde_json::Value {
    serde_json::json!({ "spec": { "replicas": replicas } })
}

/// [`ReplicaScaler`] that merge-patches MachineSets and MachineDeployments
pub struct KubeReplicaScaler {
    client: Client,
}

impl KubeReplicaScaler {
    /// Create a scaler using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReplicaScaler for KubeReplicaScaler {
    async fn set_replicas(&self, id: &NodeGroupId, replicas: i32) -> Result<(), Error> {
        let patch = build_replicas_patch(replicas);
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        match id.kind {
            ScalableKind::MachineSet => {
                let api: Api<MachineSet> = Api::namespaced(self.client.clone(), &id.namespace);
                api.patch(&id.name, &params, &Patch::Merge(&patch)).await?;
            }
            ScalableKind::MachineDeployment => {
                let api: Api<MachineDeployment> =
                    Api::namespaced(self.client.clone(), &id.namespace);
                api.patch(&id.name, &params, &Patch::Merge(&patch)).await?;
            }
        }

        info!(node_group = %id, replicas, "Patched replica count");
        Ok(())
    }
}
