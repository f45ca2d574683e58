//! Replacement creation fan-out.
//!
//! One task per target node, bounded by a semaphore, each create wrapped in a
//! deadline. A node whose replacement already exists for this rollout (same
//! node name and UID) is reported as handled without a create call, so the
//! whole operation is safe to repeat after a partial failure.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::crd::{NodeReplacement, NodeRollout};
use crate::ownership::{node_back_ref, owned_replacements, rollout_owner_ref};
use crate::selection::NodeTarget;
use crate::store::ObjectStore;
use crate::Error;

/// Limits applied to a single fan-out
#[derive(Clone, Debug)]
pub struct FanoutConfig {
    /// Maximum number of creates in flight
    pub max_concurrent: usize,
    /// Deadline for each create call
    pub creation_timeout: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            creation_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a fan-out: every node handled, plus one combined error if any
/// node failed
#[derive(Debug, Default)]
pub struct FanoutOutcome {
    /// Node names with a replacement (created now or found), sorted
    pub handled: Vec<String>,
    /// Aggregated failure, `None` when every node was handled
    pub error: Option<Error>,
}

/// Build the NodeReplacement for one target.
///
/// The name is generated from the node name; the rollout is the controlling
/// owner and the node gets an informational back-reference.
pub fn build_replacement(target: &NodeTarget, owner: OwnerReference) -> NodeReplacement {
    NodeReplacement {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-", target.spec.node_name)),
            owner_references: Some(vec![owner, node_back_ref(&target.node)]),
            ..Default::default()
        },
        spec: target.spec.clone(),
        status: None,
    }
}

/// Create the missing NodeReplacements for `targets`.
pub async fn create_replacements(
    store: Arc<dyn ObjectStore>,
    targets: &BTreeMap<String, NodeTarget>,
    rollout: &NodeRollout,
    config: &FanoutConfig,
) -> FanoutOutcome {
    let existing = match store.list_replacements().await {
        Ok(all) => owned_replacements(all, rollout),
        Err(e) => {
            return FanoutOutcome {
                handled: Vec::new(),
                error: Some(e),
            }
        }
    };
    let existing: Arc<HashSet<(String, String)>> = Arc::new(
        existing
            .into_iter()
            .map(|r| (r.spec.node_uid, r.spec.node_name))
            .collect(),
    );

    let owner = rollout_owner_ref(rollout);
    let pool = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let mut handles = Vec::with_capacity(targets.len());

    for (node_name, target) in targets {
        let store = store.clone();
        let existing = existing.clone();
        let sem = pool.clone();
        let replacement = build_replacement(target, owner.clone());
        let node_name = node_name.clone();
        let timeout = config.creation_timeout;

        handles.push(tokio::spawn(async move {
            let key = (
                replacement.spec.node_uid.clone(),
                replacement.spec.node_name.clone(),
            );
            if existing.contains(&key) {
                debug!(node = %node_name, "replacement already exists");
                return Ok(node_name);
            }

            let _permit = sem
                .acquire()
                .await
                .map_err(|e| Error::store(e.to_string()))?;

            match tokio::time::timeout(timeout, store.create_replacement(&replacement)).await {
                Ok(Ok(created)) => {
                    info!(node = %node_name, replacement = %created.name_any(), "created node replacement");
                    Ok(node_name)
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(Error::store(format!(
                    "timed out after {}s creating replacement",
                    timeout.as_secs()
                ))),
            }
        }));
    }

    let mut handled = Vec::new();
    let mut failures = Vec::new();
    for result in futures::future::join_all(handles).await {
        match result {
            Ok(Ok(node)) => handled.push(node),
            Ok(Err(e)) => failures.push(e.to_string()),
            Err(join) => failures.push(join.to_string()),
        }
    }
    handled.sort();

    if !failures.is_empty() {
        warn!(
            rollout = %rollout.name_any(),
            failed = failures.len(),
            handled = handled.len(),
            "some node replacements could not be created"
        );
    }

    FanoutOutcome {
        handled,
        error: aggregate_errors(&failures),
    }
}

/// Combine per-node failures into one error, grouping identical messages.
///
/// Groups are keyed by message text and rendered in sorted order so the
/// result does not depend on task completion order.
pub fn aggregate_errors(failures: &[String]) -> Option<Error> {
    if failures.is_empty() {
        return None;
    }

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for msg in failures {
        *counts.entry(msg.as_str()).or_default() += 1;
    }

    let message = counts
        .iter()
        .map(|(msg, n)| format!("\"{msg}\" occurred {n} time(s)"))
        .collect::<Vec<_>>()
        .join(",\n");

    Some(Error::ReplacementCreation {
        failures: failures.len(),
        message,
    })
}
