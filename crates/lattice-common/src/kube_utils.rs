//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction and the "namespace/name" key format used by
//! annotations and cache lookups.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use kube::api::ObjectMeta;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use crate::Error;

// =============================================================================
// Namespaced keys
// =============================================================================

/// A `namespace/name` pair identifying a namespaced object.
///
/// Cluster-scoped objects use an empty namespace and render as just `name`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespacedName {
    /// Object namespace ("" for cluster-scoped objects)
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl NamespacedName {
    /// Build a key from its parts
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse a `namespace/name` or bare `name` key.
    ///
    /// Rejects keys with more than one `/` and keys with an empty name.
    pub fn parse(key: &str) -> Result<Self, Error> {
        let mut parts = key.split('/');
        let (namespace, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => ("", name),
            (Some(namespace), Some(name), None) => (namespace, name),
            _ => {
                return Err(Error::invalid_key(
                    key,
                    "expected \"namespace/name\" or \"name\"",
                ))
            }
        };

        if name.is_empty() {
            return Err(Error::invalid_key(key, "name must not be empty"));
        }

        Ok(Self::new(namespace, name))
    }

    /// Key for an object's metadata.
    ///
    /// Errors when the object has no name, which only happens for objects
    /// that were never persisted.
    pub fn from_meta(meta: &ObjectMeta) -> Result<Self, Error> {
        let name = meta
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::invalid_key("", "object has no name"))?;
        Ok(Self::new(meta.namespace.clone().unwrap_or_default(), name))
    }

    /// Namespace as an option, `None` for cluster-scoped keys
    pub fn namespace(&self) -> Option<&str> {
        if self.namespace.is_empty() {
            None
        } else {
            Some(&self.namespace)
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

// =============================================================================
// Client construction
// =============================================================================

/// Default connection timeout for kube clients (5s is plenty for local API server)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients.
///
/// Watches hold the connection open, so this must exceed the watch timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    debug!(cluster_url = %config.cluster_url, "creating kube client");
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}
