//! Controller configuration
//!
//! Every setting has a default and can be overridden by a command-line flag
//! or a `FLEETROLL_*` environment variable.

use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::fanout::FanoutConfig;
use crate::retry::RetryConfig;

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Tunables shared by both controllers
#[derive(Args, Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Age after which a completed rollout is eligible for garbage collection (seconds)
    #[arg(long = "max-age-secs", env = "FLEETROLL_MAX_AGE_SECS", default_value_t = 48 * 60 * 60)]
    pub max_age_secs: u64,

    /// Maximum NodeReplacement creations in flight per rollout
    #[arg(long, env = "FLEETROLL_MAX_CONCURRENT_CREATIONS", default_value_t = 16)]
    pub max_concurrent_creations: usize,

    /// Deadline for a single NodeReplacement create call (seconds)
    #[arg(long = "creation-timeout-secs", env = "FLEETROLL_CREATION_TIMEOUT_SECS", default_value_t = 30)]
    pub creation_timeout_secs: u64,

    /// Attempts at a status write before giving up on conflicts
    #[arg(long, env = "FLEETROLL_STATUS_UPDATE_ATTEMPTS", default_value_t = 5)]
    pub status_update_attempts: u32,

    /// Requeue interval while a rollout or replacement is in progress (seconds)
    #[arg(long = "requeue-in-progress-secs", env = "FLEETROLL_REQUEUE_IN_PROGRESS_SECS", default_value_t = 30)]
    pub requeue_in_progress_secs: u64,

    /// Requeue interval after a reconcile error (seconds)
    #[arg(long = "error-requeue-secs", env = "FLEETROLL_ERROR_REQUEUE_SECS", default_value_t = 15)]
    pub error_requeue_secs: u64,

    /// Log output format
    #[arg(long, env = "FLEETROLL_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 48 * 60 * 60,
            max_concurrent_creations: 16,
            creation_timeout_secs: 30,
            status_update_attempts: 5,
            requeue_in_progress_secs: 30,
            error_requeue_secs: 15,
            log_format: LogFormat::Text,
        }
    }
}

impl ControllerConfig {
    /// Completed-rollout garbage collection age
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Requeue interval for in-progress objects
    pub fn requeue_in_progress(&self) -> Duration {
        Duration::from_secs(self.requeue_in_progress_secs)
    }

    /// Requeue interval after errors
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    /// Limits for the replacement fan-out
    pub fn fanout(&self) -> FanoutConfig {
        FanoutConfig {
            max_concurrent: self.max_concurrent_creations,
            creation_timeout: Duration::from_secs(self.creation_timeout_secs),
        }
    }

    /// Backoff for conflicting status writes
    pub fn status_retry(&self) -> RetryConfig {
        RetryConfig::with_max_attempts(self.status_update_attempts.max(1))
    }
}
