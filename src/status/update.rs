//! Conflict-aware status persistence.
//!
//! The first attempt merges into the object the handler saw. On a conflict
//! the object is re-fetched and the whole merge is re-run against the fresh
//! status. Validation and immutability errors are returned at once.
//!
//! A merge whose only effect is a newer condition `lastUpdateTime` is not
//! written, so the stored update time does not advance while a pass keeps
//! failing with the same error. Every write produces a watch event, and
//! writing those would requeue the object in a tight loop.

use chrono::Utc;
use kube::ResourceExt;
use tracing::debug;

use super::{
    merge_replacement_status, merge_rollout_status, only_update_times_differ, ReplacementResult,
    RolloutResult,
};
use crate::crd::{NodeReplacement, NodeRollout};
use crate::retry::{retry_with_backoff_if, RetryConfig};
use crate::store::ObjectStore;
use crate::Error;

/// Merge `result` into the rollout's status and write it.
///
/// Returns the stored object. When the merge changes nothing but condition
/// update times, no write is issued and the current object is returned.
pub async fn update_rollout_status(
    store: &dyn ObjectStore,
    rollout: &NodeRollout,
    result: &RolloutResult,
    retry: &RetryConfig,
) -> Result<NodeRollout, Error> {
    let name = rollout.name_any();
    let mut attempt = 0u32;

    retry_with_backoff_if(retry, "update_rollout_status", Error::is_conflict, || {
        attempt += 1;
        let refetch = attempt > 1;
        let name = name.as_str();
        async move {
            let current = if refetch {
                store.get_rollout(name).await?
            } else {
                rollout.clone()
            };
            let prev = current.status.clone().unwrap_or_default();
            let next = merge_rollout_status(&prev, result, Utc::now())?;

            if only_update_times_differ(&prev, &next, |s| &mut s.conditions) {
                debug!(rollout = %name, "status unchanged, skipping write");
                return Ok(current);
            }
            store.patch_rollout_status(&current, &next).await
        }
    })
    .await
}

/// Merge `result` into the replacement's status and write it.
pub async fn update_replacement_status(
    store: &dyn ObjectStore,
    replacement: &NodeReplacement,
    result: &ReplacementResult,
    retry: &RetryConfig,
) -> Result<NodeReplacement, Error> {
    let name = replacement.name_any();
    let mut attempt = 0u32;

    retry_with_backoff_if(retry, "update_replacement_status", Error::is_conflict, || {
        attempt += 1;
        let refetch = attempt > 1;
        let name = name.as_str();
        async move {
            let current = if refetch {
                store.get_replacement(name).await?
            } else {
                replacement.clone()
            };
            let prev = current.status.clone().unwrap_or_default();
            let next = merge_replacement_status(&prev, result, Utc::now())?;

            if only_update_times_differ(&prev, &next, |s| &mut s.conditions) {
                debug!(replacement = %name, "status unchanged, skipping write");
                return Ok(current);
            }
            store.patch_replacement_status(&current, &next).await
        }
    })
    .await
}
