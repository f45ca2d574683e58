//! Supporting types shared by the NodeRollout and NodeReplacement CRDs

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

/// Parameters controlling how a single node is replaced.
///
/// Declared on each selector/name entry of a NodeRollout and inherited by the
/// NodeReplacement created for every node the entry targets.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplacementSpec {
    /// Leave DaemonSet-managed pods in place instead of evicting them
    #[serde(default = "default_true")]
    pub ignore_daemon_sets: bool,

    /// Grace period passed to pod evictions (pod default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_seconds: Option<i64>,
}

impl Default for ReplacementSpec {
    fn default() -> Self {
        Self {
            ignore_daemon_sets: true,
            grace_period_seconds: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Label-selector entry of a NodeRollout
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriorityLabelSelector {
    /// Nodes whose labels satisfy this selector are targeted
    pub label_selector: LabelSelector,

    /// Relative ordering hint carried onto the NodeReplacement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Replacement parameters for every matched node
    #[serde(default)]
    pub replacement: ReplacementSpec,
}

/// Exact-name entry of a NodeRollout
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriorityName {
    /// Name of the node to target
    pub name: String,

    /// Relative ordering hint carried onto the NodeReplacement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Replacement parameters for the named node
    #[serde(default)]
    pub replacement: ReplacementSpec,
}

/// Pod name with the reason it was ignored or failed during a replacement
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct PodReason {
    /// Pod name
    pub name: String,
    /// Why the pod was ignored or failed
    pub reason: String,
}

impl PodReason {
    /// Create a new pod reason entry
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// NodeRollout lifecycle phase
///
/// An empty or unrecognised value reads as `New`.
#[derive(Clone, Copy, Debug, Default, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RolloutPhase {
    /// Targets not yet computed; replacements not (all) created
    #[default]
    New,
    /// Replacements created, waiting for them to finish
    InProgress,
    /// Every owned replacement finished
    Completed,
}

impl<'de> Deserialize<'de> for RolloutPhase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<String>::deserialize(deserializer)?.as_deref() {
            Some("InProgress") => Self::InProgress,
            Some("Completed") => Self::Completed,
            _ => Self::New,
        })
    }
}

impl std::fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "New"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Completed => write!(f, "Completed"),
        }
    }
}

/// NodeReplacement lifecycle phase
///
/// An empty or unrecognised value reads as `New`.
#[derive(Clone, Copy, Debug, Default, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ReplacementPhase {
    /// Node not yet inspected or cordoned
    #[default]
    New,
    /// Node cordoned, pods being evicted
    InProgress,
    /// Node drained (or gone)
    Completed,
    /// Replacement gave up
    Failed,
}

impl ReplacementPhase {
    /// Returns true once the replacement will make no further progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl<'de> Deserialize<'de> for ReplacementPhase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<String>::deserialize(deserializer)?.as_deref() {
            Some("InProgress") => Self::InProgress,
            Some("Completed") => Self::Completed,
            Some("Failed") => Self::Failed,
            _ => Self::New,
        })
    }
}

impl std::fmt::Display for ReplacementPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "New"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., NodeCordoned)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message, the error text when status is False
    #[serde(default)]
    pub message: String,

    /// Last time the condition was written
    pub last_update_time: DateTime<Utc>,

    /// Last time the condition changed status
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition whose timestamps are both `now`
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_update_time: now,
            last_transition_time: now,
        }
    }
}

/// Find a condition of the given type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}
