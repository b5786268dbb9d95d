// Worker - lease, execute, settle loop

pub mod constants;
mod panic_guard;
mod pool;
mod rotation;
mod shutdown;
mod stats;

use constants::*;
pub use panic_guard::{execute_guarded, panic_message, PanicGuardResult};
pub use pool::{RunningPool, StopReport, WorkerPool};
pub use rotation::WeightedRotation;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use stats::{ExecutionGuard, PoolCounters, PoolStats};

use crate::application::dispatcher::Dispatcher;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::QueueName;
use crate::error::{AppError, HandlerError, Result};
use crate::port::{JobEventSink, Lease, QueueStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Per-worker lifecycle, logged at debug level on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Leasing,
    Executing,
    Acking,
    Retrying,
    Failing,
    Stopped,
}

/// Timing knobs shared by all workers
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub lease_duration: Duration,
    pub poll_interval: Duration,
    /// Drop executions that outlive their lease instead of waiting
    pub abandon_after_lease: bool,
}

impl WorkerSettings {
    fn error_recovery_sleep(&self) -> Duration {
        self.poll_interval
            .max(ERROR_RECOVERY_SLEEP_DURATION)
            .min(MAX_ERROR_RECOVERY_SLEEP_DURATION)
    }
}

/// Everything a worker needs, shared by the whole pool
pub struct WorkerContext {
    pub store: Arc<dyn QueueStore>,
    pub dispatcher: Dispatcher,
    pub retry_policy: RetryPolicy,
    pub rotation: Mutex<WeightedRotation>,
    pub counters: Arc<PoolCounters>,
    pub events: Arc<dyn JobEventSink>,
    pub settings: WorkerSettings,
}

impl WorkerContext {
    /// Advance the shared rotation by one tick
    fn next_lease_order(&self) -> Result<Vec<QueueName>> {
        let mut rotation = self
            .rotation
            .lock()
            .map_err(|_| AppError::Internal("queue rotation lock poisoned".into()))?;
        Ok(rotation.next_order())
    }
}

/// Result of running one handler
enum Execution {
    Finished(Result<()>),
    /// Still running when the lease ran out; nothing is reported
    Abandoned,
}

/// A single worker loop; executes at most one handler at a time
pub struct Worker {
    id: usize,
    ctx: Arc<WorkerContext>,
}

impl Worker {
    pub fn new(id: usize, ctx: Arc<WorkerContext>) -> Self {
        Self { id, ctx }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Run worker loop with graceful shutdown support
    ///
    /// The shutdown token is checked between iterations and again when a
    /// lease comes back, so an execution in progress always reaches
    /// ack/retry/fail unless the pool aborts this task, and no new execution
    /// starts after shutdown was signalled.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(worker = self.id, "Worker started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            let processed = match self.lease_next().await {
                Ok(Some(lease)) if shutdown.is_shutdown() => {
                    self.release(&lease).await;
                    break;
                }
                Ok(Some(lease)) => self.process(&lease).await.map(|()| true),
                Ok(None) => Ok(false),
                Err(e) => Err(e),
            };
            match processed {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = sleep(self.ctx.settings.poll_interval) => {},
                        _ = shutdown.wait() => {
                            debug!(worker = self.id, "Worker interrupted during idle");
                            break;
                        }
                    }
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(worker = self.id, error = %e, "Store unavailable, backing off");
                    } else {
                        error!(worker = self.id, error = %e, "Worker error");
                    }
                    tokio::select! {
                        _ = sleep(self.ctx.settings.error_recovery_sleep()) => {},
                        _ = shutdown.wait() => {
                            debug!(worker = self.id, "Worker interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
            self.transition(WorkerState::Idle);
        }
        self.transition(WorkerState::Stopped);
        info!(worker = self.id, "Worker stopped");
    }

    /// Lease and process one envelope (returns true if one was processed)
    pub async fn process_next(&self) -> Result<bool> {
        match self.lease_next().await? {
            Some(lease) => {
                self.process(&lease).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn lease_next(&self) -> Result<Option<Lease>> {
        self.transition(WorkerState::Leasing);
        let order = self.ctx.next_lease_order()?;
        let lease = self
            .ctx
            .store
            .lease(&order, self.ctx.settings.lease_duration)
            .await?;

        if let Some(lease) = &lease {
            debug!(
                worker = self.id,
                task_id = %lease.task_id(),
                queue = %lease.envelope.queue,
                task_type = %lease.envelope.task_type,
                attempt = lease.envelope.attempt(),
                "Leased task"
            );
        }
        Ok(lease)
    }

    async fn process(&self, lease: &Lease) -> Result<()> {
        match self.execute(lease).await {
            Execution::Finished(outcome) => self.settle(lease, outcome).await,
            Execution::Abandoned => {
                warn!(
                    worker = self.id,
                    task_id = %lease.task_id(),
                    lease_ms = self.ctx.settings.lease_duration.as_millis() as u64,
                    "Execution outlived its lease, abandoning"
                );
                Ok(())
            }
        }
    }

    /// Hand back a lease granted after shutdown; if that fails the lease
    /// simply expires
    async fn release(&self, lease: &Lease) {
        match self.ctx.store.release(lease.task_id(), &lease.lease_id).await {
            Ok(()) => debug!(
                worker = self.id,
                task_id = %lease.task_id(),
                "Shutdown requested, lease released unexecuted"
            ),
            Err(e) => warn!(
                worker = self.id,
                task_id = %lease.task_id(),
                error = %e,
                "Could not release lease, task will be redelivered after expiry"
            ),
        }
    }

    async fn execute(&self, lease: &Lease) -> Execution {
        self.transition(WorkerState::Executing);
        let _executing = self.ctx.counters.begin_execution();
        let invocation = self.ctx.dispatcher.invoke(&lease.envelope);

        if self.ctx.settings.abandon_after_lease {
            match tokio::time::timeout(self.ctx.settings.lease_duration, invocation).await {
                Ok(outcome) => Execution::Finished(outcome),
                Err(_) => Execution::Abandoned,
            }
        } else {
            Execution::Finished(invocation.await)
        }
    }

    /// Report the outcome to the store. A stale lease is logged and
    /// discarded; store failures propagate so the loop backs off.
    async fn settle(&self, lease: &Lease, outcome: Result<()>) -> Result<()> {
        let reported = match outcome {
            Ok(()) => self.ack(lease).await,
            Err(err @ AppError::HandlerNotFound(_)) => self.fail(lease, &err.to_string()).await,
            Err(err) => {
                let handler_error = match err {
                    AppError::Handler(e) => e,
                    other => HandlerError::new(other.to_string()),
                };
                match self.ctx.retry_policy.decide(&lease.envelope, &handler_error) {
                    RetryDecision::Retry(delay) => self.retry(lease, delay, &handler_error).await,
                    RetryDecision::Dead => self.fail(lease, &handler_error.to_string()).await,
                }
            }
        };

        match reported {
            Ok(()) => Ok(()),
            Err(AppError::LeaseExpired { task_id }) => {
                warn!(
                    worker = self.id,
                    task_id = %task_id,
                    "Lease expired before the outcome was recorded, discarding"
                );
                Ok(())
            }
            Err(AppError::NotFound(msg)) => {
                warn!(worker = self.id, task_id = %lease.task_id(), error = %msg, "Task vanished, discarding outcome");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<()> {
        self.transition(WorkerState::Acking);
        self.ctx.store.ack(lease.task_id(), &lease.lease_id).await?;
        self.ctx.counters.record_completed();
        self.ctx.events.on_completed(&lease.envelope);
        Ok(())
    }

    async fn retry(&self, lease: &Lease, delay: Duration, error: &HandlerError) -> Result<()> {
        self.transition(WorkerState::Retrying);
        let message = truncate_error(&error.to_string());
        self.ctx
            .store
            .retry(lease.task_id(), &lease.lease_id, delay, &message)
            .await?;
        self.ctx.counters.record_retried();
        Ok(())
    }

    async fn fail(&self, lease: &Lease, reason: &str) -> Result<()> {
        self.transition(WorkerState::Failing);
        let message = truncate_error(reason);
        self.ctx
            .store
            .fail(lease.task_id(), &lease.lease_id, &message)
            .await?;
        self.ctx.counters.record_dead();
        self.ctx.events.on_dead(&lease.envelope, &message);
        Ok(())
    }

    fn transition(&self, state: WorkerState) {
        debug!(worker = self.id, state = ?state, "Worker state");
    }
}

/// Cap an error message at `MAX_ERROR_MESSAGE_LEN` bytes on a char boundary
fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
