//! Controller implementations for the fleetroll CRDs
//!
//! Each controller follows the same loop: a phase handler reads cluster state
//! and computes a result, the result is merged into status and written with
//! an optimistic-concurrency check, and any handler error is returned to the
//! driver afterwards so that progress is persisted before the requeue.

mod replacement;
mod rollout;

use std::sync::Arc;

use kube::Client;

pub use replacement::{
    handle_replacement, reconcile_replacement, replacement_error_policy, DAEMONSET_REASON,
    MIRROR_POD_ANNOTATION, MIRROR_POD_REASON, TERMINATED_REASON,
};
pub use rollout::{handle_rollout, reconcile_rollout, rollout_error_policy};

use crate::config::ControllerConfig;
use crate::drain::{KubeNodeDrainer, NodeDrainer};
use crate::store::{KubeStore, ObjectStore};
use crate::Error;

/// What a handler pass computed, plus the error to hand to the driver
#[derive(Debug, Default)]
pub struct Outcome<R> {
    /// Status changes to persist, even when `error` is set
    pub result: R,
    /// Failure to report after the status write
    pub error: Option<Error>,
}

impl<R> Outcome<R> {
    /// A successful pass
    pub fn ok(result: R) -> Self {
        Self {
            result,
            error: None,
        }
    }

    /// A failed pass whose result still records progress
    pub fn failed(result: R, error: Error) -> Self {
        Self {
            result,
            error: Some(error),
        }
    }
}

/// Shared state for both controllers
pub struct Context {
    /// Object store access (trait object for testability)
    pub store: Arc<dyn ObjectStore>,
    /// Cordon and eviction
    pub drainer: Arc<dyn NodeDrainer>,
    /// Tunables
    pub config: ControllerConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context from explicit collaborators.
    ///
    /// Used by tests and by callers that bring their own store.
    pub fn from_parts(
        store: Arc<dyn ObjectStore>,
        drainer: Arc<dyn NodeDrainer>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            drainer,
            config,
        }
    }
}

/// Builder for constructing [`Context`] instances
///
/// ```ignore
/// let ctx = Context::builder(client).config(config).build();
/// ```
pub struct ContextBuilder {
    client: Client,
    config: ControllerConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            config: ControllerConfig::default(),
        }
    }

    /// Set the controller configuration
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the Context over the API server
    pub fn build(self) -> Context {
        Context {
            store: Arc::new(KubeStore::new(self.client.clone())),
            drainer: Arc::new(KubeNodeDrainer::new(self.client)),
            config: self.config,
        }
    }
}
