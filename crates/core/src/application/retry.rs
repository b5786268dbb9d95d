// Retry logic: exponential backoff with a ceiling and per-task jitter
use crate::domain::TaskEnvelope;
use crate::error::HandlerError;
use std::time::Duration;
use tracing::{info, warn};

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry (before jitter)
    pub base: Duration,
    /// Ceiling no delay may exceed
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(crate::config::DEFAULT_BACKOFF_BASE_MS),
            max: Duration::from_millis(crate::config::DEFAULT_BACKOFF_MAX_MS),
        }
    }
}

/// Jitter factor in [0.9, 1.1] derived from a seed (the task id).
///
/// Deterministic per task, so the delays of one task never shrink between
/// retries while different tasks still spread out.
pub fn jitter_factor(seed: &str) -> f64 {
    let sum = seed.chars().map(|c| c as u32).fold(0u32, u32::wrapping_add);
    0.9 + (sum % 21) as f64 / 100.0
}

/// Delay before the next attempt:
/// `min(base * 2^retry_count * jitter, max)`
///
/// Pure function of its inputs; non-decreasing in `retry_count` for a fixed
/// jitter and never above `policy.max`.
pub fn next_delay(retry_count: u32, policy: &BackoffPolicy, jitter: f64) -> Duration {
    let exponent = retry_count.min(62) as i32;
    let raw_secs = policy.base.as_secs_f64() * 2f64.powi(exponent) * jitter;
    let capped_secs = raw_secs.min(policy.max.as_secs_f64());
    Duration::try_from_secs_f64(capped_secs).unwrap_or(policy.max)
}

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reschedule after the delay
    Retry(Duration),
    /// Move to the dead set
    Dead,
}

/// Decides between retry and dead set for a failed attempt
pub struct RetryPolicy {
    backoff: BackoffPolicy,
}

impl RetryPolicy {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self { backoff }
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Returns:
    /// - `RetryDecision::Retry(delay)` for a retryable error with budget left
    /// - `RetryDecision::Dead` for a terminal error or an exhausted budget
    pub fn decide(&self, envelope: &TaskEnvelope, error: &HandlerError) -> RetryDecision {
        if !error.is_retryable() {
            warn!(
                task_id = %envelope.id,
                attempt = envelope.attempt(),
                error = %error,
                "Non-retryable handler error"
            );
            return RetryDecision::Dead;
        }

        if envelope.retries_exhausted() {
            warn!(
                task_id = %envelope.id,
                retry_count = envelope.retry_count,
                max_retries = envelope.max_retries,
                "Max retries reached"
            );
            return RetryDecision::Dead;
        }

        let delay = next_delay(
            envelope.retry_count,
            &self.backoff,
            jitter_factor(&envelope.id),
        );

        info!(
            task_id = %envelope.id,
            attempt = envelope.attempt(),
            max_retries = envelope.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );

        RetryDecision::Retry(delay)
    }
}
