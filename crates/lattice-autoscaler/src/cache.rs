//! Synchronized resource caches
//!
//! Node group discovery only ever reads local state. The [`ResourceCache`]
//! trait is the boundary: production wires it to kube-rs reflector stores kept
//! current by list-then-watch tasks, tests wire it to [`MemoryCache`].
//!
//! Objects come out of a cache as shared `Arc`s. Never mutate through them;
//! clone into an owned value first.

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::NamespaceResourceScope;
use kube::api::Api;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lattice_common::crd::{Machine, MachineDeployment, MachineSet};
use lattice_common::kube_utils::NamespacedName;
use lattice_common::Error;

use crate::config::AutoscalerConfig;

// =============================================================================
// Label selection
// =============================================================================

/// Equality-based label selector. An empty selector matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Selector that matches every object
    pub fn everything() -> Self {
        Self::default()
    }

    /// Require `key=value`
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    /// Whether `labels` satisfies every requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

// =============================================================================
// Cache boundary
// =============================================================================

/// Read access to a locally materialized set of objects of one kind.
///
/// Implementations must be safe to read while updates are applied.
/// Absence is `None`/empty, never an error.
pub trait ResourceCache<K>: Send + Sync {
    /// Get one object. `namespace` is `None` for cluster-scoped kinds.
    fn get(&self, namespace: Option<&str>, name: &str) -> Option<Arc<K>>;

    /// List objects, optionally restricted to one namespace.
    fn list(&self, namespace: Option<&str>, selector: &LabelSelector) -> Vec<Arc<K>>;
}

fn selected<K: Resource>(obj: &K, namespace: Option<&str>, selector: &LabelSelector) -> bool {
    namespace.map_or(true, |ns| obj.meta().namespace.as_deref() == Some(ns))
        && selector.matches(obj.labels())
}

impl<K> ResourceCache<K> for Store<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    fn get(&self, namespace: Option<&str>, name: &str) -> Option<Arc<K>> {
        let mut obj_ref = ObjectRef::<K>::new(name);
        if let Some(ns) = namespace {
            obj_ref = obj_ref.within(ns);
        }
        Store::get(self, &obj_ref)
    }

    fn list(&self, namespace: Option<&str>, selector: &LabelSelector) -> Vec<Arc<K>> {
        self.state()
            .into_iter()
            .filter(|obj| selected(obj.as_ref(), namespace, selector))
            .collect()
    }
}

/// In-memory cache, used as the fake behind tests and for embedding callers
/// that feed objects themselves.
pub struct MemoryCache<K> {
    objects: DashMap<NamespacedName, Arc<K>>,
}

impl<K> Default for MemoryCache<K> {
    fn default() -> Self {
        Self {
            objects: DashMap::new(),
        }
    }
}

impl<K: Resource> MemoryCache<K> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object
    pub fn apply(&self, obj: K) -> Result<(), Error> {
        let key = NamespacedName::from_meta(obj.meta())?;
        self.objects.insert(key, Arc::new(obj));
        Ok(())
    }

    /// Remove an object, returning it if it was present
    pub fn delete(&self, namespace: Option<&str>, name: &str) -> Option<Arc<K>> {
        let key = NamespacedName::new(namespace.unwrap_or_default(), name);
        self.objects.remove(&key).map(|(_, obj)| obj)
    }

    /// Number of cached objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl<K: Resource + Send + Sync> ResourceCache<K> for MemoryCache<K> {
    fn get(&self, namespace: Option<&str>, name: &str) -> Option<Arc<K>> {
        let key = NamespacedName::new(namespace.unwrap_or_default(), name);
        self.objects.get(&key).map(|entry| Arc::clone(entry.value()))
    }

    fn list(&self, namespace: Option<&str>, selector: &LabelSelector) -> Vec<Arc<K>> {
        self.objects
            .iter()
            .filter(|entry| selected(entry.value().as_ref(), namespace, selector))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

// =============================================================================
// Cluster cache
// =============================================================================

/// The four caches node group discovery reads from.
///
/// Cheap to clone; every component takes one at construction.
#[derive(Clone)]
pub struct ClusterCache {
    /// Nodes (cluster-scoped)
    pub nodes: Arc<dyn ResourceCache<Node>>,
    /// CAPI Machines
    pub machines: Arc<dyn ResourceCache<Machine>>,
    /// CAPI MachineSets
    pub machine_sets: Arc<dyn ResourceCache<MachineSet>>,
    /// CAPI MachineDeployments
    pub machine_deployments: Arc<dyn ResourceCache<MachineDeployment>>,
}

impl Debug for ClusterCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCache").finish_non_exhaustive()
    }
}

impl ClusterCache {
    /// Bundle existing caches
    pub fn new(
        nodes: Arc<dyn ResourceCache<Node>>,
        machines: Arc<dyn ResourceCache<Machine>>,
        machine_sets: Arc<dyn ResourceCache<MachineSet>>,
        machine_deployments: Arc<dyn ResourceCache<MachineDeployment>>,
    ) -> Self {
        Self {
            nodes,
            machines,
            machine_sets,
            machine_deployments,
        }
    }

    /// Start list-then-watch reflectors for all four kinds and wait for the
    /// initial sync.
    ///
    /// CAPI kinds are scoped to `config.namespace` when set; Nodes are always
    /// watched cluster-wide. The returned handle stops the reflectors.
    pub async fn start(
        client: Client,
        config: &AutoscalerConfig,
    ) -> Result<(Self, CacheHandle), Error> {
        let token = CancellationToken::new();
        let namespace = config.namespace.as_deref();

        let (nodes, nodes_task) = spawn_reflector(Api::<Node>::all(client.clone()), &token);
        let (machines, machines_task) =
            spawn_reflector(scoped_api::<Machine>(&client, namespace), &token);
        let (machine_sets, machine_sets_task) =
            spawn_reflector(scoped_api::<MachineSet>(&client, namespace), &token);
        let (machine_deployments, machine_deployments_task) =
            spawn_reflector(scoped_api::<MachineDeployment>(&client, namespace), &token);

        let handle = CacheHandle {
            token,
            tasks: vec![
                nodes_task,
                machines_task,
                machine_sets_task,
                machine_deployments_task,
            ],
        };

        let synced = tokio::time::timeout(config.sync_timeout, async {
            futures::try_join!(
                nodes.wait_until_ready(),
                machines.wait_until_ready(),
                machine_sets.wait_until_ready(),
                machine_deployments.wait_until_ready(),
            )
        })
        .await;

        let failure = match synced {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(format!("reflector stopped before initial sync: {}", e)),
            Err(_) => Some(format!(
                "timed out after {:?} waiting for initial sync",
                config.sync_timeout
            )),
        };
        if let Some(message) = failure {
            handle.shutdown().await;
            return Err(Error::internal_with_context("cache", message));
        }

        info!(namespace = ?namespace, "Resource caches synced");

        let cache = Self::new(
            Arc::new(nodes),
            Arc::new(machines),
            Arc::new(machine_sets),
            Arc::new(machine_deployments),
        );
        Ok((cache, handle))
    }
}

/// Owns the background reflector tasks started by [`ClusterCache::start`]
pub struct CacheHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl CacheHandle {
    /// Stop all reflectors and wait for their tasks to exit
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Reflector task did not exit cleanly");
            }
        }
        debug!("Resource caches stopped");
    }
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Spawn a reflector feeding a new store until `token` is cancelled
fn spawn_reflector<K>(api: Api<K>, token: &CancellationToken) -> (Store<K>, JoinHandle<()>)
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let (reader, writer) = reflector::store();
    let stream =
        reflector::reflector(writer, watcher::watcher(api, watcher::Config::default()))
            .default_backoff();
    let token = token.clone();

    let task = tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        debug!(kind = %kind, "Starting reflector");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = stream.next() => match event {
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(kind = %kind, error = %e, "Reflector watch error, backing off");
                    }
                    None => {
                        warn!(kind = %kind, "Reflector stream ended");
                        break;
                    }
                },
            }
        }

        debug!(kind = %kind, "Reflector stopped");
    });

    (reader, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use lattice_common::crd::MachineSetSpec;

    fn machine_set(namespace: &str, name: &str, labels: &[(&str, &str)]) -> MachineSet {
        let mut ms = MachineSet::new(name, MachineSetSpec::default());
        ms.metadata = ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        };
        ms
    }

    #[test]
    fn test_label_selector() {
        let labels: BTreeMap<String, String> = [("pool".to_string(), "gpu".to_string())]
            .into_iter()
            .collect();

        assert!(LabelSelector::everything().matches(&labels));
        assert!(LabelSelector::everything().matches(&BTreeMap::new()));
        assert!(LabelSelector::everything()
            .with_label("pool", "gpu")
            .matches(&labels));
        assert!(!LabelSelector::everything()
            .with_label("pool", "cpu")
            .matches(&labels));
        assert!(!LabelSelector::everything()
            .with_label("zone", "a")
            .matches(&labels));
    }

    #[test]
    fn test_memory_cache_get_and_delete() {
        let cache = MemoryCache::new();
        cache.apply(machine_set("default", "ms-0", &[])).unwrap();

        assert!(cache.get(Some("default"), "ms-0").is_some());
        assert!(cache.get(Some("other"), "ms-0").is_none());
        assert!(cache.get(None, "ms-0").is_none());

        assert!(cache.delete(Some("default"), "ms-0").is_some());
        assert!(cache.get(Some("default"), "ms-0").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_memory_cache_apply_replaces() {
        let cache = MemoryCache::new();
        cache.apply(machine_set("default", "ms-0", &[])).unwrap();

        let mut updated = (*cache.get(Some("default"), "ms-0").unwrap()).clone();
        updated.spec.replicas = Some(4);
        cache.apply(updated).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(Some("default"), "ms-0").unwrap().replicas(), 4);
    }

    #[test]
    fn test_memory_cache_rejects_unnamed_objects() {
        let cache: MemoryCache<MachineSet> = MemoryCache::new();
        let mut ms = MachineSet::new("x", MachineSetSpec::default());
        ms.metadata.name = None;
        assert!(cache.apply(ms).is_err());
    }

    #[test]
    fn test_memory_cache_list_filters_namespace_and_labels() {
        let cache = MemoryCache::new();
        cache
            .apply(machine_set("a", "ms-0", &[("pool", "gpu")]))
            .unwrap();
        cache
            .apply(machine_set("a", "ms-1", &[("pool", "cpu")]))
            .unwrap();
        cache
            .apply(machine_set("b", "ms-2", &[("pool", "gpu")]))
            .unwrap();

        assert_eq!(cache.list(None, &LabelSelector::everything()).len(), 3);
        assert_eq!(cache.list(Some("a"), &LabelSelector::everything()).len(), 2);

        let gpu = LabelSelector::everything().with_label("pool", "gpu");
        let mut names: Vec<String> = cache
            .list(None, &gpu)
            .iter()
            .map(|ms| ms.name_any())
            .collect();
        names.sort();
        assert_eq!(names, vec!["ms-0", "ms-2"]);

        assert_eq!(cache.list(Some("a"), &gpu).len(), 1);
    }

    #[test]
    fn test_cached_objects_are_independent_of_later_updates() {
        let cache = MemoryCache::new();
        cache.apply(machine_set("default", "ms-0", &[])).unwrap();

        let before = cache.get(Some("default"), "ms-0").unwrap();
        let mut changed = (*before).clone();
        changed.spec.replicas = Some(9);
        cache.apply(changed).unwrap();

        // A reader holding the old snapshot keeps seeing it
        assert_eq!(before.replicas(), 0);
    }

    /// Story: the reflector-backed store answers lookups the same way the
    /// in-memory cache does, for namespaced and cluster-scoped kinds.
    #[test]
    fn story_reflector_store_serves_lookups() {
        let (machine_sets, mut writer) = reflector::store::<MachineSet>();
        for ms in [
            machine_set("a", "ms-0", &[("pool", "gpu")]),
            machine_set("a", "ms-1", &[("pool", "cpu")]),
            machine_set("b", "ms-2", &[("pool", "gpu")]),
        ] {
            writer.apply_watcher_event(&watcher::Event::Apply(ms));
        }

        let found = ResourceCache::get(&machine_sets, Some("a"), "ms-0").expect("ms-0 in a");
        assert_eq!(found.name_any(), "ms-0");
        assert!(ResourceCache::get(&machine_sets, Some("b"), "ms-0").is_none());
        assert!(ResourceCache::get(&machine_sets, None, "ms-0").is_none());

        let everything = LabelSelector::everything();
        let gpu = LabelSelector::everything().with_label("pool", "gpu");
        assert_eq!(ResourceCache::list(&machine_sets, None, &everything).len(), 3);
        assert_eq!(ResourceCache::list(&machine_sets, Some("a"), &everything).len(), 2);
        let mut names: Vec<String> = ResourceCache::list(&machine_sets, None, &gpu)
            .iter()
            .map(|ms| ms.name_any())
            .collect();
        names.sort();
        assert_eq!(names, vec!["ms-0", "ms-2"]);
        assert_eq!(ResourceCache::list(&machine_sets, Some("a"), &gpu).len(), 1);

        let (nodes, mut writer) = reflector::store::<Node>();
        writer.apply_watcher_event(&watcher::Event::Apply(Node {
            metadata: ObjectMeta {
                name: Some("node-0".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }));
        assert!(ResourceCache::get(&nodes, None, "node-0").is_some());
        assert!(ResourceCache::get(&nodes, None, "node-1").is_none());
        assert_eq!(ResourceCache::list(&nodes, None, &everything).len(), 1);

        // Deletions propagate
        writer.apply_watcher_event(&watcher::Event::Delete(Node {
            metadata: ObjectMeta {
                name: Some("node-0".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }));
        assert!(ResourceCache::get(&nodes, None, "node-0").is_none());
    }
}
