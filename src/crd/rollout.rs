//! NodeRollout Custom Resource Definition
//!
//! A NodeRollout declares intent to replace a set of nodes, chosen by label
//! selectors and exact names. Its controller creates one NodeReplacement per
//! targeted node and tracks them until every one has finished.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, PriorityLabelSelector, PriorityName, RolloutPhase};

/// Specification for a NodeRollout
///
/// Selector entries are applied first in order (later entries win for a node
/// matched twice); name entries are applied afterwards and always win.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fleetroll.dev",
    version = "v1alpha1",
    kind = "NodeRollout",
    plural = "noderollouts",
    shortname = "nro",
    status = "NodeRolloutStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Created","type":"integer","jsonPath":".status.replacementsCreatedCount"}"#,
    printcolumn = r#"{"name":"Completed","type":"integer","jsonPath":".status.replacementsCompletedCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeRolloutSpec {
    /// Label-selector entries, evaluated in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_selectors: Vec<PriorityLabelSelector>,

    /// Exact-name entries, evaluated after selectors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_names: Vec<PriorityName>,
}

/// Status for a NodeRollout
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRolloutStatus {
    /// Current phase of the rollout (absent means New)
    #[serde(default)]
    pub phase: RolloutPhase,

    /// Nodes a NodeReplacement was created (or found) for
    #[serde(default)]
    pub replacements_created: Vec<String>,

    /// Length of `replacements_created`
    #[serde(default)]
    pub replacements_created_count: u32,

    /// Nodes whose NodeReplacement finished successfully
    #[serde(default)]
    pub replacements_completed: Vec<String>,

    /// Length of `replacements_completed`
    #[serde(default)]
    pub replacements_completed_count: u32,

    /// Nodes whose NodeReplacement failed
    #[serde(default)]
    pub replacements_failed: Vec<String>,

    /// Length of `replacements_failed`
    #[serde(default)]
    pub replacements_failed_count: u32,

    /// When every replacement reached a terminal phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,

    /// Conditions representing sub-step outcomes
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl NodeRollout {
    /// Current phase, treating a missing status as New
    pub fn phase(&self) -> RolloutPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}
