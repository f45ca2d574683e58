//! NodeReplacement controller
//!
//! Phases:
//! - New: cordon the node, then record its pods and the ones left in place.
//!   A node that is gone, or was recreated with a new UID, makes the
//!   replacement moot and it completes immediately.
//! - InProgress: evict every recorded pod that is neither ignored nor already
//!   evicted. Completes once nothing is left to evict.
//! - Completed / Failed: terminal.
//!
//! Pods are recorded as `namespace/name`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::{Context, Outcome};
use crate::crd::{NodeReplacement, PodReason, ReplacementPhase};
use crate::status::{
    update_replacement_status, ReplacementResult, REASON_FAILED_TO_CORDON,
    REASON_FAILED_TO_EVICT_PODS, REASON_NODE_CORDONED, REASON_PODS_EVICTED,
};
use crate::Error;

/// Annotation the kubelet sets on mirror pods of static manifests
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";
/// Reason recorded for DaemonSet pods left in place
pub const DAEMONSET_REASON: &str = "DaemonSet-managed pod";
/// Reason recorded for mirror pods left in place
pub const MIRROR_POD_REASON: &str = "Mirror pod";
/// Reason recorded for pods that already finished
pub const TERMINATED_REASON: &str = "Pod already terminated";

fn pod_key(pod: &Pod) -> String {
    format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any())
}

/// Why a pod is not evicted, if it is not
fn ignore_reason(pod: &Pod, ignore_daemon_sets: bool) -> Option<&'static str> {
    if pod.annotations().contains_key(MIRROR_POD_ANNOTATION) {
        return Some(MIRROR_POD_REASON);
    }
    if ignore_daemon_sets
        && pod
            .owner_references()
            .iter()
            .any(|r| r.kind == "DaemonSet" && r.controller == Some(true))
    {
        return Some(DAEMONSET_REASON);
    }
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    if matches!(phase, Some("Succeeded") | Some("Failed")) {
        return Some(TERMINATED_REASON);
    }
    None
}

/// Run one handler pass for a replacement, dispatching on its phase.
pub async fn handle_replacement(
    replacement: &NodeReplacement,
    ctx: &Context,
) -> Outcome<ReplacementResult> {
    match replacement.phase() {
        ReplacementPhase::New => handle_new(replacement, ctx).await,
        ReplacementPhase::InProgress => handle_in_progress(replacement, ctx).await,
        ReplacementPhase::Completed | ReplacementPhase::Failed => {
            Outcome::ok(ReplacementResult::default())
        }
    }
}

fn completed(replacement: &NodeReplacement) -> ReplacementResult {
    let already = replacement
        .status
        .as_ref()
        .is_some_and(|s| s.completion_timestamp.is_some());
    ReplacementResult {
        phase: Some(ReplacementPhase::Completed),
        completion_timestamp: (!already).then(Utc::now),
        ..Default::default()
    }
}

/// Returns true when the node this replacement targets no longer exists in
/// the form it was created for
async fn node_is_gone(replacement: &NodeReplacement, ctx: &Context) -> Result<bool, Error> {
    let spec = &replacement.spec;
    match ctx.store.get_node(&spec.node_name).await? {
        None => {
            info!(node = %spec.node_name, "node no longer exists");
            Ok(true)
        }
        Some(node) if node.uid().as_deref() != Some(spec.node_uid.as_str()) => {
            info!(node = %spec.node_name, "node was recreated with a new uid");
            Ok(true)
        }
        Some(_) => Ok(false),
    }
}

async fn handle_new(replacement: &NodeReplacement, ctx: &Context) -> Outcome<ReplacementResult> {
    let spec = &replacement.spec;
    if spec.node_name.is_empty() {
        warn!("replacement has no node name");
        return Outcome::ok(ReplacementResult {
            phase: Some(ReplacementPhase::Failed),
            completion_timestamp: Some(Utc::now()),
            ..Default::default()
        });
    }

    match node_is_gone(replacement, ctx).await {
        Ok(true) => return Outcome::ok(completed(replacement)),
        Ok(false) => {}
        Err(e) => return Outcome::failed(ReplacementResult::default(), e),
    }

    // Cordon before listing, so nothing scheduled afterwards escapes nodePods
    if let Err(e) = ctx.drainer.cordon(&spec.node_name).await {
        let result = ReplacementResult {
            node_cordon_reason: Some(REASON_FAILED_TO_CORDON.to_string()),
            node_cordon_error: Some(e.to_string()),
            ..Default::default()
        };
        return Outcome::failed(result, e);
    }
    info!(node = %spec.node_name, "node cordoned");

    let mut result = ReplacementResult {
        node_cordon_reason: Some(REASON_NODE_CORDONED.to_string()),
        ..Default::default()
    };
    let pods = match ctx.store.list_pods_on_node(&spec.node_name).await {
        Ok(pods) => pods,
        Err(e) => return Outcome::failed(result, e),
    };

    let status = replacement.status.clone().unwrap_or_default();
    // Recorded once; a pass that failed after recording leaves them in place
    if status.node_pods.is_empty() && status.ignored_pods.is_empty() {
        let ignored: Vec<PodReason> = pods
            .iter()
            .filter_map(|p| {
                ignore_reason(p, spec.replacement.ignore_daemon_sets)
                    .map(|reason| PodReason::new(pod_key(p), reason))
            })
            .collect();
        debug!(pods = pods.len(), ignored = ignored.len(), "recorded node pods");
        result.node_pods = Some(pods.iter().map(pod_key).collect());
        result.ignored_pods = Some(ignored);
    }

    result.phase = Some(ReplacementPhase::InProgress);
    Outcome::ok(result)
}

async fn handle_in_progress(
    replacement: &NodeReplacement,
    ctx: &Context,
) -> Outcome<ReplacementResult> {
    match node_is_gone(replacement, ctx).await {
        Ok(true) => return Outcome::ok(completed(replacement)),
        Ok(false) => {}
        Err(e) => return Outcome::failed(ReplacementResult::default(), e),
    }

    let spec = &replacement.spec;
    let status = replacement.status.clone().unwrap_or_default();

    let live: BTreeMap<String, Pod> = match ctx.store.list_pods_on_node(&spec.node_name).await {
        Ok(pods) => pods.into_iter().map(|p| (pod_key(&p), p)).collect(),
        Err(e) => return Outcome::failed(ReplacementResult::default(), e),
    };

    let ignored: HashSet<&str> = status.ignored_pods.iter().map(|p| p.name.as_str()).collect();
    let evicted: HashSet<&str> = status.evicted_pods.iter().map(String::as_str).collect();
    let pending: Vec<&String> = status
        .node_pods
        .iter()
        .filter(|k| !ignored.contains(k.as_str()) && !evicted.contains(k.as_str()))
        .collect();

    let mut gone = Vec::new();
    let mut evictions = Vec::new();
    for key in pending {
        match live.get(key) {
            None => gone.push(key.clone()),
            Some(pod) => {
                let key = key.clone();
                let name = pod.name_any();
                let namespace = pod.namespace().unwrap_or_default();
                let drainer = ctx.drainer.clone();
                let grace = spec.replacement.grace_period_seconds;
                evictions.push(async move {
                    let res = drainer.evict(&name, &namespace, grace).await;
                    (key, res)
                });
            }
        }
    }

    let mut newly_evicted = gone;
    let mut failures = Vec::new();
    for (key, res) in futures::future::join_all(evictions).await {
        match res {
            Ok(()) => {
                debug!(pod = %key, "pod evicted");
                newly_evicted.push(key);
            }
            Err(e) => failures.push(PodReason::new(key, e.to_string())),
        }
    }

    let mut result = ReplacementResult {
        evicted_pods: Some(newly_evicted),
        ..Default::default()
    };

    if failures.is_empty() {
        info!(node = %spec.node_name, "all pods evicted");
        result.failed_pods = Some(Vec::new());
        result.pods_evicted_reason = Some(REASON_PODS_EVICTED.to_string());
        result.phase = Some(ReplacementPhase::Completed);
        if status.completion_timestamp.is_none() {
            result.completion_timestamp = Some(Utc::now());
        }
        return Outcome::ok(result);
    }

    let message = failures
        .iter()
        .map(|f| format!("{}: {}", f.name, f.reason))
        .collect::<Vec<_>>()
        .join("; ");
    let error = Error::drain(format!(
        "failed to evict {} pod(s): {message}",
        failures.len()
    ));
    result.failed_pods = Some(failures);
    result.pods_evicted_reason = Some(REASON_FAILED_TO_EVICT_PODS.to_string());
    result.pods_evicted_error = Some(error.to_string());
    Outcome::failed(result, error)
}

/// Reconcile a NodeReplacement.
#[instrument(skip(replacement, ctx), fields(replacement = %replacement.name_any(), node = %replacement.spec.node_name))]
pub async fn reconcile_replacement(
    replacement: Arc<NodeReplacement>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let current = replacement.phase();
    debug!(phase = %current, "reconciling replacement");

    let outcome = handle_replacement(&replacement, &ctx).await;
    let next = outcome.result.phase.unwrap_or(current);

    update_replacement_status(
        ctx.store.as_ref(),
        &replacement,
        &outcome.result,
        &ctx.config.status_retry(),
    )
    .await?;

    if let Some(e) = outcome.error {
        warn!(error = %e, "replacement pass failed");
        return Err(e);
    }
    if next != current {
        info!(from = %current, to = %next, "replacement phase changed");
    }

    Ok(if next.is_terminal() {
        Action::await_change()
    } else {
        Action::requeue(ctx.config.requeue_in_progress())
    })
}

/// Requeue a NodeReplacement after a failed reconcile
pub fn replacement_error_policy(
    replacement: Arc<NodeReplacement>,
    error: &Error,
    ctx: Arc<Context>,
) -> Action {
    error!(
        ?error,
        replacement = %replacement.name_any(),
        "reconciliation failed"
    );
    if error.is_retryable() {
        Action::requeue(ctx.config.error_requeue())
    } else {
        // Fails identically until the object changes
        Action::await_change()
    }
}
