//! Bounded exponential backoff with jitter.
//!
//! Used by the status writers to re-fetch and re-merge after an
//! optimistic-concurrency conflict. Errors the predicate rejects are
//! returned on the spot.
//!
//! ```ignore
//! use fleetroll::retry::{retry_with_backoff_if, RetryConfig};
//!
//! let rollout = retry_with_backoff_if(
//!     &RetryConfig::with_max_attempts(5),
//!     "update_rollout_status",
//!     Error::is_conflict,
//!     || async { store.get_rollout("roll-1").await },
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Attempt budget and delay curve for a retried operation
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts, the first one included (at least 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Ceiling for the un-jittered delay
    pub max_delay: Duration,
    /// Growth factor applied after each failed attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Default curve with a different attempt budget
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Un-jittered delay after the given failed attempt (1-based)
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(
            (self.initial_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or the attempt budget is spent. The last error is returned.
///
/// Each wait is the base delay scaled by a random factor in `[0.5, 1.5)`.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let budget = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let e = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !should_retry(&e) {
            debug!(operation = %operation_name, error = %e, "not retrying");
            return Err(e);
        }
        if attempt >= budget {
            warn!(
                operation = %operation_name,
                attempts = attempt,
                error = %e,
                "giving up"
            );
            return Err(e);
        }

        let wait = config
            .base_delay(attempt)
            .mul_f64(rand::thread_rng().gen_range(0.5..1.5));
        debug!(
            operation = %operation_name,
            attempt,
            error = %e,
            wait_ms = wait.as_millis() as u64,
            "retrying"
        );
        tokio::time::sleep(wait).await;
    }
}
