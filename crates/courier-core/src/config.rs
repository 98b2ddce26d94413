//! Worker configuration, built once at process start and passed in.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::RetryPolicy;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("backoff_multiplier must be at least 1.0, got {0}")]
    Multiplier(f64),
}

/// Settings for a dispatch worker.
///
/// Every field has a default, so a config file only needs the values it
/// changes. Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Claim holder name. Defaults to a random `worker-<ulid>`.
    pub worker_id: Option<String>,

    /// Time between cycles.
    pub poll_interval_secs: u64,

    /// Batches dispatched in parallel within one cycle.
    pub batch_concurrency: usize,

    /// Dispatch attempts before a task is errored.
    pub max_send_attempts: u32,

    /// Delay after the first failed attempt.
    pub backoff_base_secs: u64,

    pub backoff_multiplier: f64,

    /// Claims older than this are handed back at the start of a cycle.
    /// `None` disables recovery.
    pub claim_timeout_secs: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            poll_interval_secs: 60,
            batch_concurrency: 4,
            max_send_attempts: 8,
            backoff_base_secs: 120,
            backoff_multiplier: 2.0,
            claim_timeout_secs: Some(900),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Zero {
                field: "poll_interval_secs",
            });
        }
        if self.batch_concurrency == 0 {
            return Err(ConfigError::Zero {
                field: "batch_concurrency",
            });
        }
        if self.max_send_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "max_send_attempts",
            });
        }
        if self.claim_timeout_secs == Some(0) {
            return Err(ConfigError::Zero {
                field: "claim_timeout_secs",
            });
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Multiplier(self.backoff_multiplier));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn claim_timeout(&self) -> Option<Duration> {
        self.claim_timeout_secs.map(Duration::from_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_send_attempts,
            base_delay: Duration::from_secs(self.backoff_base_secs),
            multiplier: self.backoff_multiplier,
        }
    }

    pub fn worker_id(&self) -> String {
        self.worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", ulid::Ulid::new()))
    }
}
