// Enqueue Use Case

use crate::config::JobConfig;
use crate::domain::{TaskEnvelope, TaskId, TaskPayload, TaskType};
use crate::error::{AppError, Result};
use crate::port::time_provider::millis_after;
use crate::port::{IdProvider, QueueStore, TimeProvider};
use std::time::Duration;
use tracing::info;

/// Longest accepted task type or queue name
pub const MAX_NAME_LEN: usize = 255;

/// Largest accepted payload (10 MiB)
pub const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

pub use crate::config::MAX_RETRIES_LIMIT;

/// Per-task overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Retry budget; the configured default when `None`
    pub max_retries: Option<u32>,
    /// Postpone first delivery
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Enqueue request
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub queue: String,
    pub task_type: String,
    pub payload: TaskPayload,
    pub options: EnqueueOptions,
}

/// Validate enqueue request
///
/// Checks:
/// - task type and queue name are non-empty, at most 255 bytes, no NUL bytes
/// - queue is one of the configured queues
/// - payload is at most 10 MiB
/// - max_retries override is at most 100
pub fn validate_request(req: &EnqueueRequest, config: &JobConfig) -> Result<()> {
    validate_name("Task type", &req.task_type)?;
    validate_name("Queue name", &req.queue)?;

    if !config.is_known_queue(&req.queue) {
        return Err(AppError::InvalidTask(format!(
            "Unknown queue '{}' (configured: {})",
            req.queue,
            config.queues.keys().cloned().collect::<Vec<_>>().join(", ")
        )));
    }

    if req.payload.len() > MAX_PAYLOAD_BYTES {
        return Err(AppError::InvalidTask(format!(
            "Payload too large: {} bytes (max {})",
            req.payload.len(),
            MAX_PAYLOAD_BYTES
        )));
    }

    if let Some(max_retries) = req.options.max_retries {
        if max_retries > MAX_RETRIES_LIMIT {
            return Err(AppError::InvalidTask(format!(
                "max_retries {} out of range (0..={})",
                max_retries, MAX_RETRIES_LIMIT
            )));
        }
    }

    Ok(())
}

fn validate_name(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidTask(format!("{} cannot be empty", what)));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(AppError::InvalidTask(format!(
            "{} too long (max {} characters)",
            what, MAX_NAME_LEN
        )));
    }
    if value.contains('\0') {
        return Err(AppError::InvalidTask(format!(
            "{} cannot contain null bytes",
            what
        )));
    }
    Ok(())
}

/// Execute enqueue use case
///
/// # Arguments
///
/// * `store` - Durable queue store
/// * `id_provider` - ID generator (injected for determinism)
/// * `time_provider` - Time provider (injected for determinism)
/// * `config` - Known queues and the default retry budget
/// * `req` - Enqueue request
pub async fn execute(
    store: &dyn QueueStore,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    config: &JobConfig,
    req: EnqueueRequest,
) -> Result<TaskId> {
    validate_request(&req, config)?;

    let task_id = id_provider.generate_id();
    let created_at = time_provider.now_millis();
    let max_retries = req.options.max_retries.unwrap_or(config.default_max_retries);

    let mut envelope = TaskEnvelope::new(
        task_id.clone(),
        created_at,
        req.queue,
        TaskType::new(req.task_type),
        req.payload,
        max_retries,
    );
    if let Some(delay) = req.options.delay {
        envelope = envelope.delay_until(millis_after(created_at, delay));
    }

    store.push(&envelope).await?;

    info!(
        task_id = %envelope.id,
        queue = %envelope.queue,
        task_type = %envelope.task_type,
        max_retries,
        available_at = envelope.available_at,
        "Task enqueued"
    );

    Ok(task_id)
}

#[cfg(test)]
#[path = "enqueue_test.rs"]
mod enqueue_test;
