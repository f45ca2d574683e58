//! Custom Resource Definitions for fleetroll
//!
//! This module contains the NodeRollout and NodeReplacement CRDs and the
//! types they share.

mod replacement;
mod rollout;
mod types;

pub use replacement::{NodeReplacement, NodeReplacementSpec, NodeReplacementStatus};
pub use rollout::{NodeRollout, NodeRolloutSpec, NodeRolloutStatus};
pub use types::{
    find_condition, Condition, ConditionStatus, PodReason, PriorityLabelSelector, PriorityName,
    ReplacementPhase, ReplacementSpec, RolloutPhase,
};
