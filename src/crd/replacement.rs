//! NodeReplacement Custom Resource Definition
//!
//! One NodeReplacement tracks the replacement of exactly one node: cordon,
//! then evict its pods. It is owned by the NodeRollout that created it and
//! carries a non-controlling back-reference to the Node.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, PodReason, ReplacementPhase, ReplacementSpec};

/// Specification for a NodeReplacement
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fleetroll.dev",
    version = "v1alpha1",
    kind = "NodeReplacement",
    plural = "nodereplacements",
    shortname = "nrp",
    status = "NodeReplacementStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Node","type":"string","jsonPath":".spec.nodeName"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Evicted","type":"integer","jsonPath":".status.evictedPodsCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeReplacementSpec {
    /// Name of the node being replaced
    pub node_name: String,

    /// UID of the node when the replacement was created
    #[serde(rename = "nodeUID")]
    pub node_uid: String,

    /// Priority inherited from the rollout entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Replacement parameters inherited from the rollout entry
    #[serde(flatten)]
    pub replacement: ReplacementSpec,
}

/// Status for a NodeReplacement
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeReplacementStatus {
    /// Current phase (absent means New)
    #[serde(default)]
    pub phase: ReplacementPhase,

    /// Pods bound to the node when it was cordoned
    #[serde(default)]
    pub node_pods: Vec<String>,

    /// Length of `node_pods`
    #[serde(default)]
    pub node_pods_count: u32,

    /// Pods evicted so far
    #[serde(default)]
    pub evicted_pods: Vec<String>,

    /// Length of `evicted_pods`
    #[serde(default)]
    pub evicted_pods_count: u32,

    /// Pods left in place, with the reason
    #[serde(default)]
    pub ignored_pods: Vec<PodReason>,

    /// Length of `ignored_pods`
    #[serde(default)]
    pub ignored_pods_count: u32,

    /// Pods whose most recent eviction attempt failed
    #[serde(default)]
    pub failed_pods: Vec<PodReason>,

    /// Length of `failed_pods`
    #[serde(default)]
    pub failed_pods_count: u32,

    /// When the replacement finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,

    /// Conditions (NodeCordoned, PodsEvicted)
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl NodeReplacement {
    /// Current phase, treating a missing status as New
    pub fn phase(&self) -> ReplacementPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}
