//! Test fixtures: linked Nodes, Machines, and their owning groups

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Node, NodeSpec, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::Resource;

use lattice_common::crd::{
    Machine, MachineDeployment, MachineDeploymentSpec, MachineSet, MachineSetSpec, MachineSpec,
    MachineStatus,
};

use crate::cache::{ClusterCache, MemoryCache};
use crate::constants::{
    MACHINE_ANNOTATION, NODE_GROUP_MAX_SIZE_ANNOTATION, NODE_GROUP_MIN_SIZE_ANNOTATION,
};

pub const TEST_NAMESPACE: &str = "test-namespace";

/// Scaling bounds annotations
pub fn bounds(min: &str, max: &str) -> BTreeMap<String, String> {
    [
        (NODE_GROUP_MIN_SIZE_ANNOTATION.to_string(), min.to_string()),
        (NODE_GROUP_MAX_SIZE_ANNOTATION.to_string(), max.to_string()),
    ]
    .into_iter()
    .collect()
}

/// One scalable resource with its machines and nodes
#[derive(Clone, Debug)]
pub struct TestConfig {
    pub namespace: String,
    pub machine_set: MachineSet,
    pub machine_deployment: Option<MachineDeployment>,
    pub machines: Vec<Machine>,
    pub nodes: Vec<Node>,
}

pub fn machine_set_config(
    namespace: &str,
    node_count: usize,
    annotations: BTreeMap<String, String>,
) -> TestConfig {
    build_configs(namespace, 1, node_count, false, annotations).remove(0)
}

pub fn machine_set_configs(
    namespace: &str,
    count: usize,
    node_count: usize,
    annotations: BTreeMap<String, String>,
) -> Vec<TestConfig> {
    build_configs(namespace, count, node_count, false, annotations)
}

pub fn machine_deployment_config(
    namespace: &str,
    node_count: usize,
    annotations: BTreeMap<String, String>,
) -> TestConfig {
    build_configs(namespace, 1, node_count, true, annotations).remove(0)
}

pub fn machine_deployment_configs(
    namespace: &str,
    count: usize,
    node_count: usize,
    annotations: BTreeMap<String, String>,
) -> Vec<TestConfig> {
    build_configs(namespace, count, node_count, true, annotations)
}

fn meta(namespace: &str, name: &str, uid: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        uid: Some(uid.to_string()),
        ..Default::default()
    }
}

pub fn owner_ref<K: Resource<DynamicType = ()>>(owner: &K) -> OwnerReference {
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.meta().name.clone().unwrap_or_default(),
        uid: owner.meta().uid.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn build_configs(
    namespace: &str,
    count: usize,
    node_count: usize,
    root_is_deployment: bool,
    annotations: BTreeMap<String, String>,
) -> Vec<TestConfig> {
    let namespace = namespace.to_lowercase();

    (0..count)
        .map(|i| {
            let ms_name = format!("machineset-{}", i);
            let mut machine_set = MachineSet::new(
                &ms_name,
                MachineSetSpec {
                    cluster_name: "test".to_string(),
                    replicas: Some(node_count as i32),
                },
            );
            machine_set.metadata = meta(&namespace, &ms_name, &ms_name);

            let machine_deployment = if root_is_deployment {
                let md_name = format!("machinedeployment-{}", i);
                let mut md = MachineDeployment::new(
                    &md_name,
                    MachineDeploymentSpec {
                        cluster_name: "test".to_string(),
                        replicas: Some(node_count as i32),
                    },
                );
                md.metadata = meta(&namespace, &md_name, &md_name);
                md.metadata.annotations = Some(annotations.clone());
                machine_set.metadata.owner_references = Some(vec![owner_ref(&md)]);
                Some(md)
            } else {
                machine_set.metadata.annotations = Some(annotations.clone());
                None
            };

            let owner = owner_ref(&machine_set);
            let (nodes, machines) = (0..node_count)
                .map(|j| linked_node_and_machine(j, &namespace, &owner))
                .unzip();

            TestConfig {
                namespace: namespace.clone(),
                machine_set,
                machine_deployment,
                machines,
                nodes,
            }
        })
        .collect()
}

/// A Node and a Machine linked through provider ID, node ref, and annotation
pub fn linked_node_and_machine(
    i: usize,
    namespace: &str,
    owner: &OwnerReference,
) -> (Node, Machine) {
    let node_name = format!("{}-{}-node-{}", namespace, owner.name, i);
    let machine_name = format!("{}-{}-machine-{}", namespace, owner.name, i);
    let provider_id = format!("{}-{}-nodeid-{}", namespace, owner.name, i);

    let node = Node {
        metadata: ObjectMeta {
            name: Some(node_name.clone()),
            annotations: Some(
                [(
                    MACHINE_ANNOTATION.to_string(),
                    format!("{}/{}", namespace, machine_name),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            provider_id: Some(provider_id.clone()),
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut machine = Machine::new(
        &machine_name,
        MachineSpec {
            cluster_name: "test".to_string(),
            provider_id: Some(provider_id),
        },
    );
    machine.metadata.namespace = Some(namespace.to_string());
    machine.metadata.owner_references = Some(vec![owner.clone()]);
    machine.status = Some(MachineStatus {
        node_ref: Some(ObjectReference {
            kind: Some("Node".to_string()),
            name: Some(node_name),
            ..Default::default()
        }),
        phase: Some("Running".to_string()),
    });

    (node, machine)
}

/// Memory-backed caches with handles for mutating them mid-test
#[derive(Default)]
pub struct TestCluster {
    pub nodes: Arc<MemoryCache<Node>>,
    pub machines: Arc<MemoryCache<Machine>>,
    pub machine_sets: Arc<MemoryCache<MachineSet>>,
    pub machine_deployments: Arc<MemoryCache<MachineDeployment>>,
}

impl TestCluster {
    pub fn new(configs: &[&TestConfig]) -> Self {
        let cluster = Self::default();
        for config in configs {
            cluster.add(config);
        }
        cluster
    }

    pub fn cache(&self) -> ClusterCache {
        ClusterCache::new(
            self.nodes.clone(),
            self.machines.clone(),
            self.machine_sets.clone(),
            self.machine_deployments.clone(),
        )
    }

    pub fn add(&self, config: &TestConfig) {
        if let Some(md) = &config.machine_deployment {
            self.machine_deployments.apply(md.clone()).unwrap();
        }
        self.machine_sets.apply(config.machine_set.clone()).unwrap();
        for machine in &config.machines {
            self.machines.apply(machine.clone()).unwrap();
        }
        for node in &config.nodes {
            self.nodes.apply(node.clone()).unwrap();
        }
    }

    pub fn remove(&self, config: &TestConfig) {
        let ns = Some(config.namespace.as_str());
        for node in &config.nodes {
            self.nodes.delete(None, node.metadata.name.as_deref().unwrap());
        }
        for machine in &config.machines {
            self.machines
                .delete(ns, machine.metadata.name.as_deref().unwrap());
        }
        self.machine_sets
            .delete(ns, config.machine_set.metadata.name.as_deref().unwrap());
        if let Some(md) = &config.machine_deployment {
            self.machine_deployments
                .delete(ns, md.metadata.name.as_deref().unwrap());
        }
    }
}
