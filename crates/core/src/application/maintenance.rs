// Maintenance - periodic purge of completed tasks

use crate::application::worker::ShutdownToken;
use crate::error::Result;
use crate::port::{QueueStore, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Deletes completed tasks once they are older than the retention period.
///
/// The dead set is left alone; it is kept for inspection.
pub struct RetentionSweeper {
    store: Arc<dyn QueueStore>,
    time_provider: Arc<dyn TimeProvider>,
    retention: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<dyn QueueStore>,
        time_provider: Arc<dyn TimeProvider>,
        retention: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            time_provider,
            retention,
            interval,
        }
    }

    /// Purge once; returns the number of tasks removed
    pub async fn run_now(&self) -> Result<u64> {
        let retention_ms = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = self.time_provider.now_millis().saturating_sub(retention_ms);
        let purged = self.store.purge_completed(cutoff).await?;

        if purged > 0 {
            info!(purged, cutoff, "Purged completed tasks");
        } else {
            debug!(cutoff, "No completed tasks to purge");
        }
        Ok(purged)
    }

    /// Sweep every `interval` until shutdown. Failures are logged and the
    /// next tick tries again.
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            retention_ms = self.retention.as_millis() as u64,
            "Retention sweeper started"
        );

        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.run_now().await {
                        if e.is_transient() {
                            warn!(error = %e, "Store unavailable, purge skipped");
                        } else {
                            error!(error = %e, "Purge of completed tasks failed");
                        }
                    }
                }
                _ = shutdown.wait() => break,
            }
        }

        info!("Retention sweeper stopped");
    }
}
