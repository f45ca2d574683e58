//! Fleetroll - rolling node replacement for Kubernetes
//!
//! A `NodeRollout` selects a set of nodes and fans out one `NodeReplacement`
//! per node. Each replacement cordons its node and evicts the pods on it; the
//! rollout tracks its replacements until every one has finished.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (NodeRollout, NodeReplacement)
//! - [`controller`] - Reconcile loops for both resources
//! - [`selection`] - Label selector evaluation and target resolution
//! - [`fanout`] - Bounded concurrent creation of replacements
//! - [`status`] - Status merge rules and conflict-aware persistence
//! - [`store`] - Object store abstraction over the API server
//! - [`drain`] - Node cordon and pod eviction
//! - [`ownership`] - Owner reference helpers
//! - [`retry`] - Exponential backoff
//! - [`config`] - Controller tunables
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod drain;
pub mod error;
pub mod fanout;
pub mod ownership;
pub mod retry;
pub mod selection;
pub mod status;
pub mod store;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
