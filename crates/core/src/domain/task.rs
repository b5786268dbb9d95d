// Task Envelope Domain Model

use crate::domain::error::{DomainError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Task ID (UUID v4)
pub type TaskId = String;

/// Opaque token issued on lease, required to ack/retry/fail
pub type LeaseId = String;

/// Task lifecycle state. An envelope is in exactly one of these at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Leased,
    Completed,
    Dead,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Leased => "LEASED",
            TaskState::Completed => "COMPLETED",
            TaskState::Dead => "DEAD",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Dead)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(TaskState::Pending),
            "LEASED" => Ok(TaskState::Leased),
            "COMPLETED" => Ok(TaskState::Completed),
            "DEAD" => Ok(TaskState::Dead),
            other => Err(DomainError::UnknownState(other.to_string())),
        }
    }
}

/// Task type, selects the handler in the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task payload: opaque bytes, decoded by the handler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload(Vec<u8>);

impl TaskPayload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Encode a value as a JSON payload
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_vec(value).map(Self)
    }

    /// Decode a JSON payload
    pub fn decode_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Task Envelope: the unit of work tracked by the queue store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: TaskId,
    pub queue: String,
    pub task_type: TaskType,
    pub payload: TaskPayload,
    pub state: TaskState,

    // Retry budget (invariant: retry_count <= max_retries)
    pub retry_count: u32,
    pub max_retries: u32,

    // Lease
    pub lease_id: Option<LeaseId>,
    pub lease_expires_at: Option<i64>, // epoch ms

    pub available_at: i64, // epoch ms, later than created_at for delayed tasks
    pub created_at: i64,
    pub finished_at: Option<i64>,
    pub last_error: Option<String>,
}

impl TaskEnvelope {
    /// Create a pending envelope
    ///
    /// # Arguments
    ///
    /// * `id` - Unique task ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `queue` - Queue name
    /// * `task_type` - Handler selector
    /// * `payload` - Handler-specific bytes
    /// * `max_retries` - Retry budget
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        queue: impl Into<String>,
        task_type: TaskType,
        payload: TaskPayload,
        max_retries: u32,
    ) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            task_type,
            payload,
            state: TaskState::Pending,
            retry_count: 0,
            max_retries,
            lease_id: None,
            lease_expires_at: None,
            available_at: created_at,
            created_at,
            finished_at: None,
            last_error: None,
        }
    }

    /// Create a test envelope with deterministic ID and timestamp.
    ///
    /// Uses a simple counter (test-1, test-2, ...). Timestamps start at 1000
    /// and increment by 1000. Production code injects ID and time via providers.
    pub fn new_test(queue: impl Into<String>, task_type: TaskType, payload: TaskPayload) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let id = format!("test-{}", counter);
        let created_at = (counter * 1000) as i64;

        Self::new(id, created_at, queue, task_type, payload, 3)
    }

    /// Postpone first delivery until `available_at`
    pub fn delay_until(mut self, available_at: i64) -> Self {
        self.available_at = available_at.max(self.created_at);
        self
    }

    /// 1-based attempt number of the current (or next) execution
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Pending and due, or leased with an expired lease
    pub fn is_leasable(&self, now_millis: i64) -> bool {
        match self.state {
            TaskState::Pending => self.available_at <= now_millis,
            TaskState::Leased => self
                .lease_expires_at
                .map_or(true, |expires_at| expires_at <= now_millis),
            TaskState::Completed | TaskState::Dead => false,
        }
    }

    /// True if `lease_id` is the lease currently held on this envelope
    pub fn holds_lease(&self, lease_id: &str) -> bool {
        self.state == TaskState::Leased && self.lease_id.as_deref() == Some(lease_id)
    }

    /// Grant a lease (Pending/expired Leased -> Leased)
    pub fn lease(&mut self, lease_id: impl Into<String>, now_millis: i64, expires_at: i64) -> Result<()> {
        if !self.is_leasable(now_millis) {
            return Err(self.transition_error(TaskState::Leased));
        }
        self.state = TaskState::Leased;
        self.lease_id = Some(lease_id.into());
        self.lease_expires_at = Some(expires_at);
        Ok(())
    }

    /// Leased -> Completed
    pub fn complete(&mut self, now_millis: i64) -> Result<()> {
        if self.state != TaskState::Leased {
            return Err(self.transition_error(TaskState::Completed));
        }
        self.state = TaskState::Completed;
        self.finished_at = Some(now_millis);
        self.clear_lease();
        Ok(())
    }

    /// Leased -> Pending with one more retry consumed
    pub fn reschedule(&mut self, available_at: i64, error: impl Into<String>) -> Result<()> {
        if self.state != TaskState::Leased {
            return Err(self.transition_error(TaskState::Pending));
        }
        if self.retries_exhausted() {
            return Err(DomainError::RetryBudgetExhausted {
                task_id: self.id.clone(),
                max_retries: self.max_retries,
            });
        }
        self.retry_count += 1;
        self.state = TaskState::Pending;
        self.available_at = available_at;
        self.last_error = Some(error.into());
        self.clear_lease();
        Ok(())
    }

    /// Leased -> Pending without running; the retry budget is untouched
    pub fn release(&mut self) -> Result<()> {
        if self.state != TaskState::Leased {
            return Err(self.transition_error(TaskState::Pending));
        }
        self.state = TaskState::Pending;
        self.clear_lease();
        Ok(())
    }

    /// Leased -> Dead
    pub fn bury(&mut self, now_millis: i64, error: impl Into<String>) -> Result<()> {
        if self.state != TaskState::Leased {
            return Err(self.transition_error(TaskState::Dead));
        }
        self.state = TaskState::Dead;
        self.finished_at = Some(now_millis);
        self.last_error = Some(error.into());
        self.clear_lease();
        Ok(())
    }

    fn clear_lease(&mut self) {
        self.lease_id = None;
        self.lease_expires_at = None;
    }

    fn transition_error(&self, to: TaskState) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }
}
