// Worker pool - N worker loops and bounded drain
use super::{shutdown_channel, PoolCounters, PoolStats, ShutdownSender, Worker, WorkerContext};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Outcome of stopping a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopReport {
    /// Every worker finished within the drain timeout
    pub drained: bool,
    /// Workers aborted when the drain timeout elapsed
    pub abandoned_workers: usize,
    pub stats: PoolStats,
}

/// Pool configuration before spawning
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(ctx: WorkerContext, concurrency: usize) -> Self {
        Self {
            ctx: Arc::new(ctx),
            concurrency,
        }
    }

    /// Spawn exactly `concurrency` worker loops on the current runtime
    pub fn spawn(self) -> RunningPool {
        let (shutdown, token) = shutdown_channel();
        let mut workers = JoinSet::new();

        for id in 0..self.concurrency {
            let worker = Worker::new(id, Arc::clone(&self.ctx));
            let token = token.clone();
            workers.spawn(async move { worker.run(token).await });
        }

        info!(concurrency = self.concurrency, "Worker pool started");

        RunningPool {
            shutdown,
            workers,
            counters: Arc::clone(&self.ctx.counters),
        }
    }
}

/// Handle to a running pool
pub struct RunningPool {
    shutdown: ShutdownSender,
    workers: JoinSet<()>,
    counters: Arc<PoolCounters>,
}

impl RunningPool {
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Signal all workers to stop leasing and wait up to `drain_timeout` for
    /// in-flight executions to settle. Workers still running afterwards are
    /// aborted; their leases expire and the tasks are delivered again.
    pub async fn shutdown(mut self, drain_timeout: Duration) -> StopReport {
        self.shutdown.shutdown();
        info!(
            drain_timeout_ms = drain_timeout.as_millis() as u64,
            workers = self.workers.len(),
            "Draining worker pool"
        );

        let workers = &mut self.workers;
        let drained = tokio::time::timeout(drain_timeout, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Worker task failed");
                }
            }
        })
        .await
        .is_ok();

        let mut abandoned_workers = 0;
        if !drained {
            abandoned_workers = self.workers.len();
            warn!(
                abandoned_workers,
                "Drain timeout elapsed, aborting in-flight workers"
            );
            self.workers.abort_all();
            while self.workers.join_next().await.is_some() {}
            self.counters.record_abandoned(abandoned_workers as u64);
        }

        let stats = self.counters.snapshot();
        info!(
            drained,
            completed = stats.completed,
            retried = stats.retried,
            dead = stats.dead,
            "Worker pool stopped"
        );

        StopReport {
            drained,
            abandoned_workers,
            stats,
        }
    }
}
