//! Runtime configuration for node group discovery

use std::time::Duration;

use lattice_common::telemetry::LogFormat;
use lattice_common::Error;

use crate::constants::DEFAULT_SYNC_TIMEOUT_SECS;

/// Configuration shared by the caches and the directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AutoscalerConfig {
    /// Restrict discovery to one namespace. `None` watches all namespaces.
    pub namespace: Option<String>,

    /// How long to wait for the initial cache sync
    pub sync_timeout: Duration,

    /// Log output format
    pub log_format: LogFormat,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            sync_timeout: Duration::from_secs(DEFAULT_SYNC_TIMEOUT_SECS),
            log_format: LogFormat::default(),
        }
    }
}

impl AutoscalerConfig {
    /// Scope discovery to a single namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Override the initial sync timeout
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Reject settings that can never work
    pub fn validate(&self) -> Result<(), Error> {
        if self.sync_timeout.is_zero() {
            return Err(Error::validation_for_field(
                "AutoscalerConfig",
                "sync_timeout",
                "sync timeout must be greater than zero",
            ));
        }
        if let Some(ns) = &self.namespace {
            if ns.is_empty() || ns.contains('/') {
                return Err(Error::validation_for_field(
                    "AutoscalerConfig",
                    "namespace",
                    format!("invalid namespace {:?}", ns),
                ));
            }
        }
        Ok(())
    }

    /// Whether an object in `namespace` is visible under this configuration
    pub fn in_scope(&self, namespace: &str) -> bool {
        self.namespace.as_deref().map_or(true, |ns| ns == namespace)
    }
}
