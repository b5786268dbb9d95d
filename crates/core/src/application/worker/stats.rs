// Worker pool counters
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Point-in-time view of the pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Handlers running right now
    pub executing: usize,
    /// Highest `executing` value observed
    pub peak_executing: usize,
    pub completed: u64,
    pub retried: u64,
    pub dead: u64,
    /// Workers aborted by a drain timeout while executing
    pub abandoned: u64,
}

/// Counters shared by all workers of a pool
#[derive(Debug, Default)]
pub struct PoolCounters {
    executing: AtomicUsize,
    peak_executing: AtomicUsize,
    completed: AtomicU64,
    retried: AtomicU64,
    dead: AtomicU64,
    abandoned: AtomicU64,
}

impl PoolCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one handler as executing until the guard is dropped
    pub fn begin_execution(&self) -> ExecutionGuard<'_> {
        let now = self.executing.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_executing.fetch_max(now, Ordering::SeqCst);
        ExecutionGuard { counters: self }
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead(&self) {
        self.dead.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self, workers: u64) {
        self.abandoned.fetch_add(workers, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            executing: self.executing.load(Ordering::SeqCst),
            peak_executing: self.peak_executing.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead: self.dead.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the executing gauge on drop, including when the worker is aborted
pub struct ExecutionGuard<'a> {
    counters: &'a PoolCounters,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.counters.executing.fetch_sub(1, Ordering::SeqCst);
    }
}
