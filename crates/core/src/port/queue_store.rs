// Durable Queue Store Port (Interface)

use crate::domain::{LeaseId, QueueName, TaskEnvelope, TaskId, TaskState};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A time-bounded exclusive claim on one envelope
#[derive(Debug, Clone)]
pub struct Lease {
    pub envelope: TaskEnvelope,
    pub lease_id: LeaseId,
    pub expires_at: i64, // epoch ms
}

impl Lease {
    pub fn task_id(&self) -> &TaskId {
        &self.envelope.id
    }
}

/// Durable store for task envelopes.
///
/// Every mutating operation must be atomic. In particular two concurrent
/// `lease` calls never receive the same envelope, and `ack`/`retry`/`fail`
/// only succeed for the lease currently held on the envelope; a stale lease
/// yields `AppError::LeaseExpired`.
///
/// Delivery is at-least-once: a lease that is neither acked, retried nor
/// failed before it expires makes the envelope eligible for leasing again.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Liveness check used at startup
    async fn ping(&self) -> Result<()>;

    /// Insert a new pending envelope
    async fn push(&self, envelope: &TaskEnvelope) -> Result<()>;

    /// Lease the oldest eligible envelope of the first queue in `queues`
    /// that has one (FIFO within a queue)
    async fn lease(&self, queues: &[QueueName], lease_duration: Duration) -> Result<Option<Lease>>;

    /// Mark a leased envelope completed
    async fn ack(&self, id: &TaskId, lease_id: &LeaseId) -> Result<()>;

    /// Return a leased envelope to pending after `delay`, consuming one retry
    async fn retry(&self, id: &TaskId, lease_id: &LeaseId, delay: Duration, error: &str)
        -> Result<()>;

    /// Move a leased envelope to the dead set
    async fn fail(&self, id: &TaskId, lease_id: &LeaseId, error: &str) -> Result<()>;

    /// Hand a leased envelope back unexecuted; the retry count is unchanged
    async fn release(&self, id: &TaskId, lease_id: &LeaseId) -> Result<()>;

    /// Delete completed envelopes finished before `finished_before` (epoch ms).
    /// The dead set is never purged. Returns the number removed.
    async fn purge_completed(&self, finished_before: i64) -> Result<u64>;

    /// Find envelope by ID
    async fn get(&self, id: &TaskId) -> Result<Option<TaskEnvelope>>;

    /// Count envelopes of a queue by state
    async fn count_by_state(&self, queue: &str, state: TaskState) -> Result<i64>;

    /// Dead set of a queue, oldest failure first
    async fn dead_tasks(&self, queue: &str) -> Result<Vec<TaskEnvelope>>;

    /// Release connections; later calls may fail with `StoreUnavailable`
    async fn close(&self);
}
