//! Integration tests for fleetroll
//!
//! These tests require a Kubernetes cluster (kind) and tell the story of how
//! platform operators interact with rollouts through the API server.
//!
//! # Test Organization
//!
//! - `crd_operations`: Stories about creating NodeRollout and NodeReplacement
//!   resources and writing their status with optimistic concurrency
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored
//! ```

mod crd_operations;
mod helpers;
