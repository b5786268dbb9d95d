//! In-memory [`QueueStore`] for tests and embedded single-process use.
//!
//! All state sits behind one mutex, which makes every operation trivially
//! atomic. Nothing survives a restart.

use crate::domain::{LeaseId, QueueName, TaskEnvelope, TaskId, TaskState};
use crate::error::{AppError, Result};
use crate::port::time_provider::millis_after;
use crate::port::{Lease, QueueStore, TimeProvider};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct StoreState {
    tasks: HashMap<TaskId, TaskEnvelope>,
    /// Pending or leased task ids per queue, keyed by enqueue sequence
    live: HashMap<QueueName, BTreeMap<u64, TaskId>>,
    seq_of: HashMap<TaskId, u64>,
    next_seq: u64,
}

impl StoreState {
    fn leased_mut(&mut self, id: &TaskId, lease_id: &LeaseId) -> Result<&mut TaskEnvelope> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))?;
        if !task.holds_lease(lease_id) {
            return Err(AppError::LeaseExpired {
                task_id: id.clone(),
            });
        }
        Ok(task)
    }

    fn retire(&mut self, queue: &str, id: &TaskId) {
        if let Some(seq) = self.seq_of.remove(id) {
            if let Some(index) = self.live.get_mut(queue) {
                index.remove(&seq);
            }
        }
    }
}

pub struct InMemoryQueueStore {
    state: Mutex<StoreState>,
    time_provider: Arc<dyn TimeProvider>,
    closed: AtomicBool,
}

impl InMemoryQueueStore {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            time_provider,
            closed: AtomicBool::new(false),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, StoreState>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable("in-memory store is closed".into()));
        }
        self.state
            .lock()
            .map_err(|_| AppError::Internal("in-memory store lock poisoned".into()))
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn ping(&self) -> Result<()> {
        self.state().map(|_| ())
    }

    async fn push(&self, envelope: &TaskEnvelope) -> Result<()> {
        let mut state = self.state()?;
        if state.tasks.contains_key(&envelope.id) {
            return Err(AppError::InvalidState(format!(
                "Task {} already exists",
                envelope.id
            )));
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .live
            .entry(envelope.queue.clone())
            .or_default()
            .insert(seq, envelope.id.clone());
        state.seq_of.insert(envelope.id.clone(), seq);
        state.tasks.insert(envelope.id.clone(), envelope.clone());
        Ok(())
    }

    async fn lease(&self, queues: &[QueueName], lease_duration: Duration) -> Result<Option<Lease>> {
        let now = self.time_provider.now_millis();
        let expires_at = millis_after(now, lease_duration);
        let mut state = self.state()?;

        for queue in queues {
            let candidate = state.live.get(queue).and_then(|index| {
                index
                    .values()
                    .find(|id| state.tasks.get(*id).is_some_and(|t| t.is_leasable(now)))
                    .cloned()
            });

            if let Some(id) = candidate {
                let lease_id = uuid::Uuid::new_v4().to_string();
                let task = state
                    .tasks
                    .get_mut(&id)
                    .ok_or_else(|| AppError::Internal(format!("Index points at missing task {}", id)))?;
                task.lease(lease_id.clone(), now, expires_at)?;
                return Ok(Some(Lease {
                    envelope: task.clone(),
                    lease_id,
                    expires_at,
                }));
            }
        }
        Ok(None)
    }

    async fn ack(&self, id: &TaskId, lease_id: &LeaseId) -> Result<()> {
        let now = self.time_provider.now_millis();
        let mut state = self.state()?;
        let task = state.leased_mut(id, lease_id)?;
        task.complete(now)?;
        let queue = task.queue.clone();
        state.retire(&queue, id);
        Ok(())
    }

    async fn retry(
        &self,
        id: &TaskId,
        lease_id: &LeaseId,
        delay: Duration,
        error: &str,
    ) -> Result<()> {
        let available_at = millis_after(self.time_provider.now_millis(), delay);
        let mut state = self.state()?;
        let task = state.leased_mut(id, lease_id)?;
        task.reschedule(available_at, error)?;
        Ok(())
    }

    async fn fail(&self, id: &TaskId, lease_id: &LeaseId, error: &str) -> Result<()> {
        let now = self.time_provider.now_millis();
        let mut state = self.state()?;
        let task = state.leased_mut(id, lease_id)?;
        task.bury(now, error)?;
        let queue = task.queue.clone();
        state.retire(&queue, id);
        Ok(())
    }

    async fn release(&self, id: &TaskId, lease_id: &LeaseId) -> Result<()> {
        let mut state = self.state()?;
        state.leased_mut(id, lease_id)?.release()?;
        Ok(())
    }

    async fn purge_completed(&self, finished_before: i64) -> Result<u64> {
        let mut state = self.state()?;
        let before = state.tasks.len();
        state.tasks.retain(|_, t| {
            !(t.state == TaskState::Completed && t.finished_at.is_some_and(|at| at < finished_before))
        });
        Ok((before - state.tasks.len()) as u64)
    }

    async fn get(&self, id: &TaskId) -> Result<Option<TaskEnvelope>> {
        Ok(self.state()?.tasks.get(id).cloned())
    }

    async fn count_by_state(&self, queue: &str, task_state: TaskState) -> Result<i64> {
        let state = self.state()?;
        let count = state
            .tasks
            .values()
            .filter(|t| t.queue == queue && t.state == task_state)
            .count();
        Ok(count as i64)
    }

    async fn dead_tasks(&self, queue: &str) -> Result<Vec<TaskEnvelope>> {
        let state = self.state()?;
        let mut dead: Vec<TaskEnvelope> = state
            .tasks
            .values()
            .filter(|t| t.queue == queue && t.state == TaskState::Dead)
            .cloned()
            .collect();
        dead.sort_by_key(|t| (t.finished_at, t.created_at));
        Ok(dead)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub mod mocks {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type LeaseHook = Box<dyn Fn() + Send + Sync>;

    /// [`InMemoryQueueStore`] that fails on demand with `StoreUnavailable`
    pub struct FlakyQueueStore {
        inner: InMemoryQueueStore,
        ping_failures: AtomicUsize,
        lease_failures: AtomicUsize,
        lease_calls: AtomicUsize,
        on_lease: Mutex<Option<LeaseHook>>,
    }

    impl FlakyQueueStore {
        pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
            Self {
                inner: InMemoryQueueStore::new(time_provider),
                ping_failures: AtomicUsize::new(0),
                lease_failures: AtomicUsize::new(0),
                lease_calls: AtomicUsize::new(0),
                on_lease: Mutex::new(None),
            }
        }

        /// Fail the next `n` pings
        pub fn fail_pings(&self, n: usize) {
            self.ping_failures.store(n, Ordering::SeqCst);
        }

        /// Fail the next `n` leases
        pub fn fail_leases(&self, n: usize) {
            self.lease_failures.store(n, Ordering::SeqCst);
        }

        pub fn lease_calls(&self) -> usize {
            self.lease_calls.load(Ordering::SeqCst)
        }

        /// Run `hook` at the start of every lease call
        pub fn on_lease(&self, hook: impl Fn() + Send + Sync + 'static) {
            *self.on_lease.lock().unwrap() = Some(Box::new(hook));
        }
    }

    fn take_failure(budget: &AtomicUsize) -> bool {
        budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[async_trait]
    impl QueueStore for FlakyQueueStore {
        async fn ping(&self) -> Result<()> {
            if take_failure(&self.ping_failures) {
                return Err(AppError::StoreUnavailable("injected ping failure".into()));
            }
            self.inner.ping().await
        }

        async fn push(&self, envelope: &TaskEnvelope) -> Result<()> {
            self.inner.push(envelope).await
        }

        async fn lease(&self, queues: &[QueueName], lease_duration: Duration) -> Result<Option<Lease>> {
            self.lease_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(hook) = self.on_lease.lock().unwrap().as_ref() {
                hook();
            }
            if take_failure(&self.lease_failures) {
                return Err(AppError::StoreUnavailable("injected lease failure".into()));
            }
            self.inner.lease(queues, lease_duration).await
        }

        async fn ack(&self, id: &TaskId, lease_id: &LeaseId) -> Result<()> {
            self.inner.ack(id, lease_id).await
        }

        async fn retry(
            &self,
            id: &TaskId,
            lease_id: &LeaseId,
            delay: Duration,
            error: &str,
        ) -> Result<()> {
            self.inner.retry(id, lease_id, delay, error).await
        }

        async fn fail(&self, id: &TaskId, lease_id: &LeaseId, error: &str) -> Result<()> {
            self.inner.fail(id, lease_id, error).await
        }

        async fn release(&self, id: &TaskId, lease_id: &LeaseId) -> Result<()> {
            self.inner.release(id, lease_id).await
        }

        async fn purge_completed(&self, finished_before: i64) -> Result<u64> {
            self.inner.purge_completed(finished_before).await
        }

        async fn get(&self, id: &TaskId) -> Result<Option<TaskEnvelope>> {
            self.inner.get(id).await
        }

        async fn count_by_state(&self, queue: &str, task_state: TaskState) -> Result<i64> {
            self.inner.count_by_state(queue, task_state).await
        }

        async fn dead_tasks(&self, queue: &str) -> Result<Vec<TaskEnvelope>> {
            self.inner.dead_tasks(queue).await
        }

        async fn close(&self) {
            self.inner.close().await
        }
    }
}
