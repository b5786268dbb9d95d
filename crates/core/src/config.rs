//! Job engine configuration
//!
//! Loaded by the composition root (see the daemon's `settings` module) and
//! handed to [`crate::JobService`]. Durations are plain milliseconds so the
//! whole struct can be set from environment variables.

use crate::domain::QueueConfig;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "~/.jobq/jobq.db";
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_LEASE_DURATION_MS: u64 = 30_000;
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 10 * 60 * 1000;
pub const DEFAULT_CONNECT_RETRIES: u32 = 3;
pub const DEFAULT_CONNECT_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_COMPLETED_RETENTION_MS: u64 = 24 * 60 * 60 * 1000;
pub const DEFAULT_PURGE_INTERVAL_MS: u64 = 10 * 60 * 1000;

/// Highest accepted retry budget, per task or as the default
pub const MAX_RETRIES_LIMIT: u32 = 100;
pub const MAX_LEASE_DURATION_MS: u64 = 24 * 60 * 60 * 1000;
pub const MAX_BACKOFF_MS: u64 = 7 * 24 * 60 * 60 * 1000;
pub const MAX_COMPLETED_RETENTION_MS: u64 = 365 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Store connection address
    pub database_url: String,

    /// Total number of handler invocations allowed to run at once
    pub concurrency: usize,

    /// Queue name -> scheduling weight
    pub queues: BTreeMap<String, u32>,

    pub default_max_retries: u32,
    pub lease_duration_ms: u64,
    pub drain_timeout_ms: u64,

    /// Idle sleep when no queue has work
    pub poll_interval_ms: u64,

    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,

    /// Liveness checks attempted by `start()` after the first one fails
    pub connect_retries: u32,
    pub connect_retry_delay_ms: u64,

    /// Give up on executions that outlive their lease
    pub abandon_after_lease: bool,

    /// Completed tasks older than this are purged; the dead set is kept
    pub completed_retention_ms: u64,
    pub purge_interval_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        let queues = BTreeMap::from([
            ("critical".to_string(), 6),
            ("default".to_string(), 3),
            ("low".to_string(), 2),
        ]);

        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            queues,
            default_max_retries: DEFAULT_MAX_RETRIES,
            lease_duration_ms: DEFAULT_LEASE_DURATION_MS,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            connect_retry_delay_ms: DEFAULT_CONNECT_RETRY_DELAY_MS,
            abandon_after_lease: false,
            completed_retention_ms: DEFAULT_COMPLETED_RETENTION_MS,
            purge_interval_ms: DEFAULT_PURGE_INTERVAL_MS,
        }
    }
}

impl JobConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(AppError::Config("concurrency must be at least 1".into()));
        }
        if self.queues.is_empty() {
            return Err(AppError::Config("at least one queue must be configured".into()));
        }
        if let Some((name, _)) = self.queues.iter().find(|(_, weight)| **weight == 0) {
            return Err(AppError::Config(format!(
                "queue '{}' must have a positive weight",
                name
            )));
        }
        if self.queues.keys().any(|name| name.trim().is_empty()) {
            return Err(AppError::Config("queue names must not be empty".into()));
        }
        if self.lease_duration_ms == 0 {
            return Err(AppError::Config("lease_duration_ms must be positive".into()));
        }
        if self.lease_duration_ms > MAX_LEASE_DURATION_MS {
            return Err(AppError::Config(format!(
                "lease_duration_ms must be at most {}",
                MAX_LEASE_DURATION_MS
            )));
        }
        if self.default_max_retries > MAX_RETRIES_LIMIT {
            return Err(AppError::Config(format!(
                "default_max_retries must be at most {}",
                MAX_RETRIES_LIMIT
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(AppError::Config("poll_interval_ms must be positive".into()));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(AppError::Config(format!(
                "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        if self.backoff_max_ms > MAX_BACKOFF_MS {
            return Err(AppError::Config(format!(
                "backoff_max_ms must be at most {}",
                MAX_BACKOFF_MS
            )));
        }
        if self.completed_retention_ms > MAX_COMPLETED_RETENTION_MS {
            return Err(AppError::Config(format!(
                "completed_retention_ms must be at most {}",
                MAX_COMPLETED_RETENTION_MS
            )));
        }
        if self.purge_interval_ms == 0 {
            return Err(AppError::Config("purge_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Queues ordered by descending weight, then name
    pub fn queue_configs(&self) -> Vec<QueueConfig> {
        let mut queues: Vec<QueueConfig> = self
            .queues
            .iter()
            .map(|(name, weight)| QueueConfig::new(name.clone(), *weight))
            .collect();
        queues.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.name.cmp(&b.name)));
        queues
    }

    pub fn is_known_queue(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_millis(self.completed_retention_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_millis(self.purge_interval_ms)
    }
}
