//! NodeRollout controller
//!
//! Phases:
//! - New: select target nodes and fan out NodeReplacement creation. Any
//!   failure keeps the rollout in New; the nodes already handled are still
//!   recorded and the next pass skips them.
//! - InProgress: collect which owned replacements completed or failed and
//!   move to Completed once every created replacement has finished.
//! - Completed: nothing to do; past the max age the rollout is reported as
//!   eligible for garbage collection.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::{Context, Outcome};
use crate::crd::{NodeRollout, ReplacementPhase, RolloutPhase};
use crate::fanout::create_replacements;
use crate::ownership::owned_replacements;
use crate::selection::select_targets;
use crate::status::{
    update_rollout_status, RolloutResult, REASON_FAILED_CREATING_REPLACEMENTS,
    REASON_REPLACEMENTS_CREATED,
};
use crate::Error;

/// Run one handler pass for a rollout, dispatching on its phase.
pub async fn handle_rollout(rollout: &NodeRollout, ctx: &Context) -> Outcome<RolloutResult> {
    match rollout.phase() {
        RolloutPhase::New => handle_new(rollout, ctx).await,
        RolloutPhase::InProgress => handle_in_progress(rollout, ctx).await,
        RolloutPhase::Completed => handle_completed(rollout, ctx),
    }
}

fn creation_failed(created: Option<Vec<String>>, error: Error) -> Outcome<RolloutResult> {
    Outcome::failed(
        RolloutResult {
            replacements_created: created,
            replacements_created_reason: Some(REASON_FAILED_CREATING_REPLACEMENTS.to_string()),
            replacements_created_error: Some(error.to_string()),
            ..Default::default()
        },
        error,
    )
}

async fn handle_new(rollout: &NodeRollout, ctx: &Context) -> Outcome<RolloutResult> {
    let nodes = match ctx.store.list_nodes().await {
        Ok(nodes) => nodes,
        Err(e) => return creation_failed(None, e),
    };

    let targets = match select_targets(
        &nodes,
        &rollout.spec.node_selectors,
        &rollout.spec.node_names,
    ) {
        Ok(targets) => targets,
        Err(e) => return creation_failed(None, e),
    };
    info!(targets = targets.len(), nodes = nodes.len(), "selected target nodes");

    let fanout = create_replacements(
        ctx.store.clone(),
        &targets,
        rollout,
        &ctx.config.fanout(),
    )
    .await;

    match fanout.error {
        Some(e) => creation_failed(Some(fanout.handled), e),
        None => {
            info!(created = fanout.handled.len(), "all node replacements created");
            Outcome::ok(RolloutResult {
                phase: Some(RolloutPhase::InProgress),
                replacements_created: Some(fanout.handled),
                replacements_created_reason: Some(REASON_REPLACEMENTS_CREATED.to_string()),
                ..Default::default()
            })
        }
    }
}

async fn handle_in_progress(rollout: &NodeRollout, ctx: &Context) -> Outcome<RolloutResult> {
    let replacements = match ctx.store.list_replacements().await {
        Ok(all) => owned_replacements(all, rollout),
        Err(e) => return Outcome::failed(RolloutResult::default(), e),
    };

    // A node recreated during a retried fan-out has more than one owned
    // replacement; it only counts once all of them are terminal.
    let mut completed = BTreeSet::new();
    let mut failed = BTreeSet::new();
    let mut pending = BTreeSet::new();
    for r in &replacements {
        let node = r.spec.node_name.clone();
        match r.phase() {
            ReplacementPhase::Completed => {
                completed.insert(node);
            }
            ReplacementPhase::Failed => {
                failed.insert(node);
            }
            ReplacementPhase::New | ReplacementPhase::InProgress => {
                pending.insert(node);
            }
        }
    }
    completed.retain(|n| !pending.contains(n));
    failed.retain(|n| !pending.contains(n) && !completed.contains(n));

    let status = rollout.status.clone().unwrap_or_default();
    let finished = |node: &String| {
        !pending.contains(node)
            && (completed.contains(node)
                || failed.contains(node)
                || status.replacements_completed.contains(node)
                || status.replacements_failed.contains(node))
    };
    let remaining = status
        .replacements_created
        .iter()
        .filter(|n| !finished(n))
        .count();
    debug!(
        completed = completed.len(),
        failed = failed.len(),
        remaining,
        "replacement progress"
    );

    let mut result = RolloutResult {
        replacements_completed: Some(completed.into_iter().collect()),
        replacements_failed: Some(failed.into_iter().collect()),
        ..Default::default()
    };
    if remaining == 0 {
        info!("every node replacement finished");
        result.phase = Some(RolloutPhase::Completed);
        if status.completion_timestamp.is_none() {
            result.completion_timestamp = Some(Utc::now());
        }
    }
    Outcome::ok(result)
}

fn handle_completed(rollout: &NodeRollout, ctx: &Context) -> Outcome<RolloutResult> {
    let completed_at = rollout
        .status
        .as_ref()
        .and_then(|s| s.completion_timestamp);
    if let Some(at) = completed_at {
        let age = Utc::now().signed_duration_since(at);
        if age.to_std().is_ok_and(|age| age > ctx.config.max_age()) {
            // TODO: delete the rollout (and its replacements by cascade) once GC is enabled
            info!(
                completed_at = %at,
                max_age_secs = ctx.config.max_age().as_secs(),
                "rollout eligible for garbage collection"
            );
        }
    }
    Outcome::ok(RolloutResult::default())
}

/// Reconcile a NodeRollout.
///
/// Status is persisted before a handler error is returned, so partial
/// progress survives the requeue.
#[instrument(skip(rollout, ctx), fields(rollout = %rollout.name_any()))]
pub async fn reconcile_rollout(
    rollout: Arc<NodeRollout>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let current = rollout.phase();
    debug!(phase = %current, "reconciling rollout");

    let outcome = handle_rollout(&rollout, &ctx).await;
    let next = outcome.result.phase.unwrap_or(current);

    update_rollout_status(
        ctx.store.as_ref(),
        &rollout,
        &outcome.result,
        &ctx.config.status_retry(),
    )
    .await?;

    if let Some(e) = outcome.error {
        warn!(error = %e, "rollout pass failed");
        return Err(e);
    }
    if next != current {
        info!(from = %current, to = %next, "rollout phase changed");
    }

    Ok(match next {
        RolloutPhase::New | RolloutPhase::InProgress => {
            Action::requeue(ctx.config.requeue_in_progress())
        }
        RolloutPhase::Completed => Action::await_change(),
    })
}

/// Requeue a NodeRollout after a failed reconcile
pub fn rollout_error_policy(rollout: Arc<NodeRollout>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        rollout = %rollout.name_any(),
        "reconciliation failed"
    );
    if error.is_retryable() {
        Action::requeue(ctx.config.error_requeue())
    } else {
        // Fails identically until the object changes
        Action::await_change()
    }
}
