//! Error types for the fleetroll controllers

use thiserror::Error;

/// Main error type for fleetroll operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Invalid input: malformed label selector, inconsistent handler result
    #[error("validation error: {0}")]
    Validation(String),

    /// Attempt to overwrite a status field that may only be set once
    #[error("cannot update {field}, field is immutable once set")]
    Immutable {
        /// Name of the offending status field (e.g. `NodePods`)
        field: &'static str,
    },

    /// Optimistic-concurrency failure: the object changed since it was read
    #[error("conflict updating {kind} {name}: object has been modified")]
    Conflict {
        /// Resource kind
        kind: &'static str,
        /// Resource name
        name: String,
    },

    /// The object does not exist (any more)
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind
        kind: &'static str,
        /// Resource name
        name: String,
    },

    /// Transient object store failure that is not a conflict
    #[error("store error: {0}")]
    Store(String),

    /// One or more per-node replacement creations failed
    #[error("failed to create {failures} node replacement(s): {message}")]
    ReplacementCreation {
        /// Number of failed per-node tasks
        failures: usize,
        /// Combined, de-duplicated failure messages
        message: String,
    },

    /// Node cordon or pod eviction failure
    #[error("drain error: {0}")]
    Drain(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a store error with the given message
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a drain error with the given message
    pub fn drain(msg: impl Into<String>) -> Self {
        Self::Drain(msg.into())
    }

    /// Create a conflict error for the given object
    pub fn conflict(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            name: name.into(),
        }
    }

    /// Create a not-found error for the given object
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Map a kube error for a specific object, lifting 409 and 404 into
    /// [`Error::Conflict`] and [`Error::NotFound`]
    pub fn from_kube(kind: &'static str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref ae) if ae.code == 409 => Self::conflict(kind, name),
            kube::Error::Api(ref ae) if ae.code == 404 => Self::not_found(kind, name),
            other => Self::Kube(other),
        }
    }

    /// Returns true for optimistic-concurrency conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true if retrying the same operation later may succeed.
    ///
    /// Validation and immutability errors repeat until the object changes, so
    /// the error policies wait for a change instead of requeueing.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Immutable { .. } => false,
            Self::Kube(_)
            | Self::Conflict { .. }
            | Self::NotFound { .. }
            | Self::Store(_)
            | Self::ReplacementCreation { .. }
            | Self::Drain(_) => true,
        }
    }
}
