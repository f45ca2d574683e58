//! Status merge engine
//!
//! A handler pass produces a result: a bag of optional changes. Merging it
//! into the previous status is pure and single-pass, and follows per-field
//! rules:
//!
//! - phase: overwritten when the result sets it
//! - set-once lists (`nodePods`, `ignoredPods`, and `replacementsCreated` once
//!   the rollout has left New): adopted if previously empty, otherwise the
//!   merge fails with [`Error::Immutable`]
//! - union lists (`evictedPods`, `replacementsCompleted`, `replacementsFailed`):
//!   set union with the previous value
//! - replaceable lists (`failedPods`): overwritten
//! - `completionTimestamp`: set once, never overwritten
//! - conditions: upserted by type when the result supplies a reason
//!
//! Every count field is recomputed from its list. A failed merge returns the
//! first violation and no partial status.

mod update;

pub use update::{update_replacement_status, update_rollout_status};

use std::collections::HashSet;
use std::hash::Hash;

use chrono::{DateTime, Utc};

use crate::crd::{
    Condition, ConditionStatus, NodeReplacementStatus, NodeRolloutStatus, PodReason,
    ReplacementPhase, RolloutPhase,
};
use crate::Error;

/// Condition type reported by the rollout fan-out
pub const CONDITION_REPLACEMENTS_CREATED: &str = "ReplacementsCreated";
/// Condition type reported by the replacement cordon step
pub const CONDITION_NODE_CORDONED: &str = "NodeCordoned";
/// Condition type reported by the replacement eviction step
pub const CONDITION_PODS_EVICTED: &str = "PodsEvicted";

/// Reason: every target node has a replacement
pub const REASON_REPLACEMENTS_CREATED: &str = "ReplacementsCreated";
/// Reason: selection or fan-out failed
pub const REASON_FAILED_CREATING_REPLACEMENTS: &str = "FailedCreatingReplacements";
/// Reason: node marked unschedulable
pub const REASON_NODE_CORDONED: &str = "NodeCordoned";
/// Reason: cordon call failed
pub const REASON_FAILED_TO_CORDON: &str = "FailedToCordon";
/// Reason: every evictable pod evicted
pub const REASON_PODS_EVICTED: &str = "PodsEvicted";
/// Reason: at least one eviction failed
pub const REASON_FAILED_TO_EVICT_PODS: &str = "FailedToEvictPods";

/// Changes a NodeRollout handler pass wants applied to status
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RolloutResult {
    /// New phase
    pub phase: Option<RolloutPhase>,
    /// Nodes handled by the fan-out
    pub replacements_created: Option<Vec<String>>,
    /// Nodes whose replacement completed
    pub replacements_completed: Option<Vec<String>>,
    /// Nodes whose replacement failed
    pub replacements_failed: Option<Vec<String>>,
    /// When the rollout completed
    pub completion_timestamp: Option<DateTime<Utc>>,
    /// Reason for the ReplacementsCreated condition
    pub replacements_created_reason: Option<String>,
    /// Error text for the ReplacementsCreated condition (requires a reason)
    pub replacements_created_error: Option<String>,
}

/// Changes a NodeReplacement handler pass wants applied to status
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplacementResult {
    /// New phase
    pub phase: Option<ReplacementPhase>,
    /// Pods on the node when it was inspected
    pub node_pods: Option<Vec<String>>,
    /// Pods evicted in this pass
    pub evicted_pods: Option<Vec<String>>,
    /// Pods left in place
    pub ignored_pods: Option<Vec<PodReason>>,
    /// Current eviction failures
    pub failed_pods: Option<Vec<PodReason>>,
    /// When the replacement completed
    pub completion_timestamp: Option<DateTime<Utc>>,
    /// Reason for the NodeCordoned condition
    pub node_cordon_reason: Option<String>,
    /// Error text for the NodeCordoned condition (requires a reason)
    pub node_cordon_error: Option<String>,
    /// Reason for the PodsEvicted condition
    pub pods_evicted_reason: Option<String>,
    /// Error text for the PodsEvicted condition (requires a reason)
    pub pods_evicted_error: Option<String>,
}

/// Merge a rollout handler result into the previous status.
pub fn merge_rollout_status(
    prev: &NodeRolloutStatus,
    result: &RolloutResult,
    now: DateTime<Utc>,
) -> Result<NodeRolloutStatus, Error> {
    validate_condition(
        CONDITION_REPLACEMENTS_CREATED,
        &result.replacements_created_reason,
        &result.replacements_created_error,
    )?;

    let mut next = prev.clone();

    if let Some(created) = &result.replacements_created {
        // While New the fan-out may be retried after a partial failure, so
        // progress accumulates; after that the set is frozen.
        next.replacements_created = if prev.phase == RolloutPhase::New {
            union(&prev.replacements_created, created)
        } else {
            set_once("ReplacementsCreated", &prev.replacements_created, created)?
        };
    }
    if let Some(completed) = &result.replacements_completed {
        next.replacements_completed = union(&prev.replacements_completed, completed);
    }
    if let Some(failed) = &result.replacements_failed {
        next.replacements_failed = union(&prev.replacements_failed, failed);
    }
    if let Some(ts) = result.completion_timestamp {
        next.completion_timestamp = Some(set_timestamp_once(prev.completion_timestamp, ts)?);
    }

    next.replacements_created_count = count(&next.replacements_created);
    next.replacements_completed_count = count(&next.replacements_completed);
    next.replacements_failed_count = count(&next.replacements_failed);

    upsert_condition(
        &mut next.conditions,
        CONDITION_REPLACEMENTS_CREATED,
        result.replacements_created_reason.as_deref(),
        result.replacements_created_error.as_deref(),
        now,
    );

    if let Some(phase) = result.phase {
        next.phase = phase;
    }

    Ok(next)
}

/// Merge a replacement handler result into the previous status.
pub fn merge_replacement_status(
    prev: &NodeReplacementStatus,
    result: &ReplacementResult,
    now: DateTime<Utc>,
) -> Result<NodeReplacementStatus, Error> {
    validate_condition(
        CONDITION_NODE_CORDONED,
        &result.node_cordon_reason,
        &result.node_cordon_error,
    )?;
    validate_condition(
        CONDITION_PODS_EVICTED,
        &result.pods_evicted_reason,
        &result.pods_evicted_error,
    )?;

    let mut next = prev.clone();

    if let Some(pods) = &result.node_pods {
        next.node_pods = set_once("NodePods", &prev.node_pods, pods)?;
    }
    if let Some(pods) = &result.evicted_pods {
        next.evicted_pods = union(&prev.evicted_pods, pods);
    }
    if let Some(pods) = &result.ignored_pods {
        if !prev.ignored_pods.is_empty() {
            return Err(Error::Immutable {
                field: "IgnoredPods",
            });
        }
        next.ignored_pods = dedup_by_name(pods);
    }
    if let Some(pods) = &result.failed_pods {
        next.failed_pods = dedup_by_name(pods);
    }
    if let Some(ts) = result.completion_timestamp {
        next.completion_timestamp = Some(set_timestamp_once(prev.completion_timestamp, ts)?);
    }

    next.node_pods_count = count(&next.node_pods);
    next.evicted_pods_count = count(&next.evicted_pods);
    next.ignored_pods_count = count(&next.ignored_pods);
    next.failed_pods_count = count(&next.failed_pods);

    upsert_condition(
        &mut next.conditions,
        CONDITION_NODE_CORDONED,
        result.node_cordon_reason.as_deref(),
        result.node_cordon_error.as_deref(),
        now,
    );
    upsert_condition(
        &mut next.conditions,
        CONDITION_PODS_EVICTED,
        result.pods_evicted_reason.as_deref(),
        result.pods_evicted_error.as_deref(),
        now,
    );

    if let Some(phase) = result.phase {
        next.phase = phase;
    }

    Ok(next)
}

/// An error must always come with a reason
fn validate_condition(
    type_: &str,
    reason: &Option<String>,
    error: &Option<String>,
) -> Result<(), Error> {
    let has_reason = reason.as_deref().is_some_and(|r| !r.is_empty());
    if error.is_some() && !has_reason {
        return Err(Error::validation(format!(
            "{type_} error set without a reason"
        )));
    }
    Ok(())
}

/// Insert or update the condition of `type_`.
///
/// Status is False with the error as message when an error is given, True
/// with an empty message otherwise. The update time always moves to `now`;
/// the transition time only when the status value changes. Without a reason
/// the conditions are left untouched.
pub fn upsert_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    reason: Option<&str>,
    error: Option<&str>,
    now: DateTime<Utc>,
) {
    let Some(reason) = reason.filter(|r| !r.is_empty()) else {
        return;
    };

    let (status, message) = match error {
        Some(err) => (ConditionStatus::False, err.to_string()),
        None => (ConditionStatus::True, String::new()),
    };

    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != status {
                existing.last_transition_time = now;
            }
            existing.status = status;
            existing.reason = reason.to_string();
            existing.message = message;
            existing.last_update_time = now;
        }
        None => conditions.push(Condition::new(type_, status, reason, message, now)),
    }
}

fn set_once(
    field: &'static str,
    prev: &[String],
    incoming: &[String],
) -> Result<Vec<String>, Error> {
    if !prev.is_empty() {
        return Err(Error::Immutable { field });
    }
    Ok(dedup(incoming))
}

fn set_timestamp_once(
    prev: Option<DateTime<Utc>>,
    incoming: DateTime<Utc>,
) -> Result<DateTime<Utc>, Error> {
    match prev {
        Some(_) => Err(Error::Immutable {
            field: "CompletionTimestamp",
        }),
        None => Ok(incoming),
    }
}

/// Previous entries first, then new ones in order, without duplicates
fn union(prev: &[String], incoming: &[String]) -> Vec<String> {
    dedup(prev.iter().chain(incoming.iter()))
}

fn dedup<'a, T>(items: impl IntoIterator<Item = &'a T>) -> Vec<T>
where
    T: Clone + Eq + Hash + 'a,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(*item))
        .cloned()
        .collect()
}

fn dedup_by_name(pods: &[PodReason]) -> Vec<PodReason> {
    let mut seen = HashSet::new();
    pods.iter()
        .filter(|p| seen.insert(p.name.as_str()))
        .cloned()
        .collect()
}

fn count<T>(items: &[T]) -> u32 {
    u32::try_from(items.len()).unwrap_or(u32::MAX)
}

/// True when two statuses differ at most in condition update times.
///
/// Used to skip writes that would only refresh a timestamp, since every
/// status write triggers another reconcile.
pub(crate) fn only_update_times_differ<S, F>(a: &S, b: &S, conditions: F) -> bool
where
    S: Clone + PartialEq,
    F: Fn(&mut S) -> &mut Vec<Condition>,
{
    let mut a = a.clone();
    let mut b = b.clone();
    for c in conditions(&mut a).iter_mut() {
        c.last_update_time = DateTime::<Utc>::MIN_UTC;
    }
    for c in conditions(&mut b).iter_mut() {
        c.last_update_time = DateTime::<Utc>::MIN_UTC;
    }
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::find_condition;
    use chrono::Duration;
    use rstest::rstest;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn pods(items: &[(&str, &str)]) -> Vec<PodReason> {
        items.iter().map(|(n, r)| PodReason::new(*n, *r)).collect()
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    // =========================================================================
    // Set-once Fields
    // =========================================================================

    /// Story: Pods on the node are recorded once and then frozen
    #[test]
    fn story_node_pods_set_once() {
        let result = ReplacementResult {
            node_pods: Some(strings(&["p1", "p2", "p1"])),
            ..Default::default()
        };
        let first = merge_replacement_status(&Default::default(), &result, t0()).unwrap();
        assert_eq!(first.node_pods, strings(&["p1", "p2"]));
        assert_eq!(first.node_pods_count, 2);

        let again = ReplacementResult {
            node_pods: Some(strings(&["p3"])),
            ..Default::default()
        };
        let err = merge_replacement_status(&first, &again, t0()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot update NodePods, field is immutable once set"
        );
    }

    #[test]
    fn ignored_pods_set_once() {
        let result = ReplacementResult {
            ignored_pods: Some(pods(&[("ds-1", "DaemonSet"), ("mirror", "MirrorPod")])),
            ..Default::default()
        };
        let first = merge_replacement_status(&Default::default(), &result, t0()).unwrap();
        assert_eq!(first.ignored_pods_count, 2);

        let err = merge_replacement_status(&first, &result, t0()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot update IgnoredPods, field is immutable once set"
        );
    }

    /// Story: Created replacements accumulate while New, then freeze
    ///
    /// A partial fan-out failure keeps the rollout in New; the retry reports
    /// every node again and the names are unioned. Once the rollout has
    /// moved on, the set cannot be rewritten.
    #[test]
    fn story_replacements_created_freeze_after_new() {
        let partial = RolloutResult {
            replacements_created: Some(strings(&["n1"])),
            ..Default::default()
        };
        let s = merge_rollout_status(&Default::default(), &partial, t0()).unwrap();
        assert_eq!(s.replacements_created, strings(&["n1"]));

        let retry = RolloutResult {
            phase: Some(RolloutPhase::InProgress),
            replacements_created: Some(strings(&["n1", "n2", "n3"])),
            ..Default::default()
        };
        let s = merge_rollout_status(&s, &retry, t0()).unwrap();
        assert_eq!(s.replacements_created, strings(&["n1", "n2", "n3"]));
        assert_eq!(s.replacements_created_count, 3);
        assert_eq!(s.phase, RolloutPhase::InProgress);

        let rewrite = RolloutResult {
            replacements_created: Some(strings(&["n4"])),
            ..Default::default()
        };
        let err = merge_rollout_status(&s, &rewrite, t0()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot update ReplacementsCreated, field is immutable once set"
        );
    }

    // =========================================================================
    // Union and Replace Fields
    // =========================================================================

    /// Story: Evicted pods from several passes are unioned
    #[test]
    fn story_evicted_pods_union() {
        let prev = NodeReplacementStatus {
            evicted_pods: strings(&["a", "c"]),
            evicted_pods_count: 2,
            ..Default::default()
        };
        let result = ReplacementResult {
            evicted_pods: Some(strings(&["b", "d", "a"])),
            ..Default::default()
        };
        let next = merge_replacement_status(&prev, &result, t0()).unwrap();

        let got: HashSet<_> = next.evicted_pods.iter().cloned().collect();
        let want: HashSet<_> = strings(&["a", "b", "c", "d"]).into_iter().collect();
        assert_eq!(got, want);
        assert_eq!(next.evicted_pods.len(), 4);
        assert_eq!(next.evicted_pods_count, 4);
    }

    #[test]
    fn failed_pods_are_replaced() {
        let prev = NodeReplacementStatus {
            failed_pods: pods(&[("p1", "pdb"), ("p3", "pdb")]),
            failed_pods_count: 2,
            ..Default::default()
        };
        let result = ReplacementResult {
            failed_pods: Some(pods(&[("p2", "timeout"), ("p4", "timeout")])),
            ..Default::default()
        };
        let next = merge_replacement_status(&prev, &result, t0()).unwrap();
        assert_eq!(next.failed_pods, pods(&[("p2", "timeout"), ("p4", "timeout")]));
        assert_eq!(next.failed_pods_count, 2);

        let cleared = merge_replacement_status(
            &next,
            &ReplacementResult {
                failed_pods: Some(vec![]),
                ..Default::default()
            },
            t0(),
        )
        .unwrap();
        assert!(cleared.failed_pods.is_empty());
        assert_eq!(cleared.failed_pods_count, 0);
    }

    #[test]
    fn rollout_completed_and_failed_are_unions() {
        let prev = NodeRolloutStatus {
            phase: RolloutPhase::InProgress,
            replacements_completed: strings(&["n1"]),
            ..Default::default()
        };
        let result = RolloutResult {
            replacements_completed: Some(strings(&["n1", "n2"])),
            replacements_failed: Some(strings(&["n3"])),
            ..Default::default()
        };
        let next = merge_rollout_status(&prev, &result, t0()).unwrap();
        assert_eq!(next.replacements_completed, strings(&["n1", "n2"]));
        assert_eq!(next.replacements_completed_count, 2);
        assert_eq!(next.replacements_failed_count, 1);
    }

    #[test]
    fn unset_fields_are_left_alone() {
        let prev = NodeReplacementStatus {
            phase: ReplacementPhase::InProgress,
            node_pods: strings(&["p1"]),
            node_pods_count: 1,
            ..Default::default()
        };
        let next = merge_replacement_status(&prev, &ReplacementResult::default(), t0()).unwrap();
        assert_eq!(next, prev);
    }

    // =========================================================================
    // Completion Timestamp
    // =========================================================================

    /// Story: The completion timestamp is written exactly once
    #[test]
    fn story_completion_timestamp_set_once() {
        let result = ReplacementResult {
            completion_timestamp: Some(t0()),
            ..Default::default()
        };
        let first = merge_replacement_status(&Default::default(), &result, t0()).unwrap();
        assert_eq!(first.completion_timestamp, Some(t0()));

        let later = ReplacementResult {
            completion_timestamp: Some(t0() + Duration::hours(1)),
            ..Default::default()
        };
        let err = merge_replacement_status(&first, &later, t0()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot update CompletionTimestamp, field is immutable once set"
        );
        assert_eq!(first.completion_timestamp, Some(t0()));
    }

    #[test]
    fn rollout_completion_timestamp_set_once() {
        let prev = NodeRolloutStatus {
            completion_timestamp: Some(t0()),
            ..Default::default()
        };
        let result = RolloutResult {
            completion_timestamp: Some(t0()),
            ..Default::default()
        };
        assert!(matches!(
            merge_rollout_status(&prev, &result, t0()),
            Err(Error::Immutable {
                field: "CompletionTimestamp"
            })
        ));
    }

    // =========================================================================
    // Conditions
    // =========================================================================

    /// Story: A reason alone records a healthy condition
    #[test]
    fn story_reason_only_condition_is_true() {
        let result = ReplacementResult {
            node_cordon_reason: Some(REASON_NODE_CORDONED.to_string()),
            ..Default::default()
        };
        let next = merge_replacement_status(&Default::default(), &result, t0()).unwrap();

        assert_eq!(next.conditions.len(), 1);
        let c = find_condition(&next.conditions, CONDITION_NODE_CORDONED).unwrap();
        assert_eq!(c.status, ConditionStatus::True);
        assert_eq!(c.reason, "NodeCordoned");
        assert_eq!(c.message, "");
        assert_eq!(c.last_update_time, t0());
        assert_eq!(c.last_transition_time, t0());
    }

    /// Story: A reason with an error records a failed condition with the error text
    #[test]
    fn story_reason_and_error_condition_is_false() {
        let result = ReplacementResult {
            node_cordon_reason: Some(REASON_FAILED_TO_CORDON.to_string()),
            node_cordon_error: Some("error creating replacements".to_string()),
            ..Default::default()
        };
        let next = merge_replacement_status(&Default::default(), &result, t0()).unwrap();

        let c = find_condition(&next.conditions, CONDITION_NODE_CORDONED).unwrap();
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.reason, "FailedToCordon");
        assert_eq!(c.message, "error creating replacements");
    }

    /// Story: Transition time moves only when the status value flips
    #[test]
    fn story_transition_time_tracks_status_changes() {
        let failing = ReplacementResult {
            pods_evicted_reason: Some(REASON_FAILED_TO_EVICT_PODS.to_string()),
            pods_evicted_error: Some("pdb".to_string()),
            ..Default::default()
        };
        let t1 = t0() + Duration::minutes(1);
        let t2 = t0() + Duration::minutes(2);

        let s = merge_replacement_status(&Default::default(), &failing, t0()).unwrap();
        let s = merge_replacement_status(&s, &failing, t1).unwrap();
        let c = find_condition(&s.conditions, CONDITION_PODS_EVICTED).unwrap();
        assert_eq!(c.last_update_time, t1);
        assert_eq!(c.last_transition_time, t0());

        let healed = ReplacementResult {
            pods_evicted_reason: Some(REASON_PODS_EVICTED.to_string()),
            ..Default::default()
        };
        let s = merge_replacement_status(&s, &healed, t2).unwrap();
        let c = find_condition(&s.conditions, CONDITION_PODS_EVICTED).unwrap();
        assert_eq!(c.status, ConditionStatus::True);
        assert_eq!(c.message, "");
        assert_eq!(c.last_update_time, t2);
        assert_eq!(c.last_transition_time, t2);
        assert_eq!(s.conditions.len(), 1);
    }

    #[test]
    fn conditions_of_other_types_are_untouched() {
        let s = merge_replacement_status(
            &Default::default(),
            &ReplacementResult {
                node_cordon_reason: Some(REASON_NODE_CORDONED.to_string()),
                ..Default::default()
            },
            t0(),
        )
        .unwrap();
        let s = merge_replacement_status(
            &s,
            &ReplacementResult {
                pods_evicted_reason: Some(REASON_PODS_EVICTED.to_string()),
                ..Default::default()
            },
            t0() + Duration::minutes(5),
        )
        .unwrap();

        let cordoned = find_condition(&s.conditions, CONDITION_NODE_CORDONED).unwrap();
        assert_eq!(cordoned.last_update_time, t0());
        assert_eq!(s.conditions.len(), 2);
    }

    #[rstest]
    #[case::error_only(None, Some("boom"), true)]
    #[case::empty_reason_with_error(Some(""), Some("boom"), true)]
    #[case::reason_only(Some("test"), None, false)]
    #[case::both(Some("test"), Some("boom"), false)]
    #[case::neither(None, None, false)]
    fn error_requires_reason(
        #[case] reason: Option<&str>,
        #[case] error: Option<&str>,
        #[case] rejected: bool,
    ) {
        let result = ReplacementResult {
            node_cordon_reason: reason.map(String::from),
            node_cordon_error: error.map(String::from),
            ..Default::default()
        };
        let merged = merge_replacement_status(&Default::default(), &result, t0());
        assert_eq!(matches!(merged, Err(Error::Validation(_))), rejected);
    }

    /// Story: A rejected merge touches nothing
    ///
    /// The result sets valid fields alongside an error without a reason; the
    /// caller gets the validation error and no status at all.
    #[test]
    fn story_validation_precedes_mutation() {
        let result = RolloutResult {
            phase: Some(RolloutPhase::InProgress),
            replacements_created: Some(strings(&["n1"])),
            replacements_created_error: Some("boom".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            merge_rollout_status(&Default::default(), &result, t0()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn update_time_only_changes_are_detected() {
        let failing = ReplacementResult {
            pods_evicted_reason: Some(REASON_FAILED_TO_EVICT_PODS.to_string()),
            pods_evicted_error: Some("pdb".to_string()),
            ..Default::default()
        };
        let a = merge_replacement_status(&Default::default(), &failing, t0()).unwrap();
        let b = merge_replacement_status(&a, &failing, t0() + Duration::minutes(1)).unwrap();
        assert_ne!(a, b);
        assert!(only_update_times_differ(&a, &b, |s| &mut s.conditions));

        let c = merge_replacement_status(
            &b,
            &ReplacementResult {
                evicted_pods: Some(strings(&["p1"])),
                ..Default::default()
            },
            t0(),
        )
        .unwrap();
        assert!(!only_update_times_differ(&b, &c, |s| &mut s.conditions));
    }
}
