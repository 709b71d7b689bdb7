//! Error types for Lattice node group discovery
//!
//! Errors are structured with fields to aid debugging in production.
//! Absence (a resource not found, not linked, not owned) is never an error
//! in this workspace; lookups return `Ok(None)` for that. The variants here
//! cover operator mistakes, malformed keys, rejected resizes, and failures
//! talking to the API server.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Lattice operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Misconfiguration on a resource, e.g. unparseable scaling bounds
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// The misconfigured resource (e.g. "MachineSet/default/workers")
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The offending field or annotation key
        field: Option<String>,
    },

    /// A lookup key that cannot be split into namespace and name
    #[error("invalid key {key:?}: {message}")]
    InvalidKey {
        /// The key as supplied by the caller
        key: String,
        /// Why the key was rejected
        message: String,
    },

    /// A resize request the node group cannot honor
    #[error("scale error for {node_group}: {message}")]
    Scale {
        /// Identifier of the node group being resized
        node_group: String,
        /// Description of what was rejected
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "cache", "create_client")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    ///
    /// For simple validation errors without resource context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a scale error for a node group
    pub fn scale(node_group: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Scale {
            node_group: node_group.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, key, and scale errors need a config or caller fix.
    /// Kubernetes errors depend on the status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Don't retry on 4xx errors (validation, not found, conflict...)
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Validation { .. } => false,
            Error::InvalidKey { .. } => false,
            Error::Scale { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether this error reports an operator misconfiguration
    pub fn is_misconfiguration(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// Get the resource name if this error is associated with one
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::Validation { resource, .. } => Some(resource),
            Error::Scale { node_group, .. } => Some(node_group),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}
