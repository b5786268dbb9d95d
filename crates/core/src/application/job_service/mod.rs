// Job Service - producer API and worker pool lifecycle

pub mod enqueue;

pub use enqueue::{EnqueueOptions, EnqueueRequest};

use crate::application::dispatcher::{handler_fn, DispatcherBuilder, HandlerResult, TaskHandler};
use crate::application::maintenance::RetentionSweeper;
use crate::application::retry::{BackoffPolicy, RetryPolicy};
use crate::application::worker::{
    shutdown_channel, PoolCounters, PoolStats, RunningPool, ShutdownSender, StopReport,
    WeightedRotation, WorkerContext, WorkerPool, WorkerSettings,
};
use crate::config::JobConfig;
use crate::domain::{TaskId, TaskPayload};
use crate::error::{AppError, Result};
use crate::port::id_provider::UuidProvider;
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{IdProvider, JobEventSink, QueueStore, TimeProvider, TracingEventSink};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

enum Lifecycle {
    Created,
    Running(Running),
    Stopped,
}

struct Running {
    pool: RunningPool,
    sweeper_stop: ShutdownSender,
    sweeper: JoinHandle<()>,
}

/// Owns the store, the handler registrations and the worker pool.
///
/// Typical use: register handlers, `start()`, enqueue from anywhere holding
/// a reference, then `stop()` (or `shutdown()`) once.
pub struct JobService {
    config: JobConfig,
    store: Arc<dyn QueueStore>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    events: Arc<dyn JobEventSink>,
    registrations: Mutex<Vec<(String, Arc<dyn TaskHandler>)>>,
    counters: Arc<PoolCounters>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    started: AtomicBool,
}

impl JobService {
    pub fn new(
        config: JobConfig,
        store: Arc<dyn QueueStore>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        events: Arc<dyn JobEventSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            id_provider,
            time_provider,
            events,
            registrations: Mutex::new(Vec::new()),
            counters: Arc::new(PoolCounters::new()),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::Created),
            started: AtomicBool::new(false),
        })
    }

    /// Production wiring: UUID ids, system clock, log-only event sink
    pub fn with_defaults(config: JobConfig, store: Arc<dyn QueueStore>) -> Result<Self> {
        Self::new(
            config,
            store,
            Arc::new(UuidProvider),
            Arc::new(SystemTimeProvider),
            Arc::new(TracingEventSink),
        )
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Register a handler for a task type. Duplicates are reported by `start()`.
    pub fn register_handler(
        &self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            return Err(AppError::InvalidState(
                "handlers must be registered before start()".into(),
            ));
        }
        self.registrations
            .lock()
            .map_err(|_| AppError::Internal("handler registry lock poisoned".into()))?
            .push((task_type.into(), handler));
        Ok(())
    }

    /// Register an async closure as a handler
    pub fn register_fn<F, Fut>(&self, task_type: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(TaskPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_handler(task_type, handler_fn(f))
    }

    /// Enqueue a task; only validation and store errors reach the producer
    pub async fn enqueue(
        &self,
        queue: impl Into<String>,
        task_type: impl Into<String>,
        payload: TaskPayload,
        options: EnqueueOptions,
    ) -> Result<TaskId> {
        let req = EnqueueRequest {
            queue: queue.into(),
            task_type: task_type.into(),
            payload,
            options,
        };
        enqueue::execute(
            self.store.as_ref(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            &self.config,
            req,
        )
        .await
    }

    /// Build the dispatcher, wait for the store, then spawn the worker pool.
    ///
    /// Fails with `AppError::Startup` on duplicate handlers, an unreachable
    /// store, or when called twice.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Running(_) => {
                return Err(AppError::startup(AppError::InvalidState(
                    "job service already running".into(),
                )))
            }
            Lifecycle::Stopped => {
                return Err(AppError::startup(AppError::InvalidState(
                    "job service was stopped".into(),
                )))
            }
        }

        self.started.store(true, Ordering::SeqCst);
        match self.launch().await {
            Ok(running) => {
                *lifecycle = Lifecycle::Running(running);
                info!(
                    concurrency = self.config.concurrency,
                    queues = ?self.config.queues,
                    "Job service started"
                );
                Ok(())
            }
            Err(e) => {
                // Registration stays open so the caller can fix things and retry
                self.started.store(false, Ordering::SeqCst);
                error!(error = %e, "Job service failed to start");
                Err(AppError::startup(e))
            }
        }
    }

    async fn launch(&self) -> Result<Running> {
        let dispatcher = self.build_dispatcher()?;
        self.await_store().await?;
        let rotation = WeightedRotation::new(&self.config.queue_configs())?;

        let ctx = WorkerContext {
            store: Arc::clone(&self.store),
            dispatcher,
            retry_policy: RetryPolicy::new(BackoffPolicy::new(
                Duration::from_millis(self.config.backoff_base_ms),
                Duration::from_millis(self.config.backoff_max_ms),
            )),
            rotation: Mutex::new(rotation),
            counters: Arc::clone(&self.counters),
            events: Arc::clone(&self.events),
            settings: WorkerSettings {
                lease_duration: self.config.lease_duration(),
                poll_interval: self.config.poll_interval(),
                abandon_after_lease: self.config.abandon_after_lease,
            },
        };

        let (sweeper_stop, sweeper_token) = shutdown_channel();
        let sweeper = tokio::spawn(self.retention_sweeper().run(sweeper_token));

        Ok(Running {
            pool: WorkerPool::new(ctx, self.config.concurrency).spawn(),
            sweeper_stop,
            sweeper,
        })
    }

    /// Purge completed tasks past the retention period once, outside the
    /// periodic sweep
    pub async fn purge_completed(&self) -> Result<u64> {
        self.retention_sweeper().run_now().await
    }

    fn retention_sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.time_provider),
            self.config.completed_retention(),
            self.config.purge_interval(),
        )
    }

    /// Stop leasing, drain in-flight executions for at most `drain_timeout`,
    /// then close the store. Calling it again is a no-op.
    pub async fn stop(&self, drain_timeout: Duration) -> StopReport {
        let mut lifecycle = self.lifecycle.lock().await;
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(running) => {
                running.sweeper_stop.shutdown();
                let report = running.pool.shutdown(drain_timeout).await;
                if let Err(e) = running.sweeper.await {
                    error!(error = %e, "Retention sweeper task failed");
                }
                self.store.close().await;
                info!(
                    drained = report.drained,
                    abandoned_workers = report.abandoned_workers,
                    "Job service stopped"
                );
                report
            }
            Lifecycle::Created => {
                self.store.close().await;
                self.idle_report()
            }
            Lifecycle::Stopped => self.idle_report(),
        }
    }

    /// `stop()` with the configured drain timeout
    pub async fn shutdown(&self) -> StopReport {
        self.stop(self.config.drain_timeout()).await
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock().await, Lifecycle::Running(_))
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    fn idle_report(&self) -> StopReport {
        StopReport {
            drained: true,
            abandoned_workers: 0,
            stats: self.counters.snapshot(),
        }
    }

    fn build_dispatcher(&self) -> Result<crate::application::dispatcher::Dispatcher> {
        let registrations = self
            .registrations
            .lock()
            .map_err(|_| AppError::Internal("handler registry lock poisoned".into()))?;

        let mut builder = DispatcherBuilder::new();
        for (task_type, handler) in registrations.iter() {
            builder.register(task_type.clone(), Arc::clone(handler))?;
        }
        let dispatcher = builder.build();
        if dispatcher.is_empty() {
            warn!("No handlers registered; every task will be moved to the dead set");
        }
        Ok(dispatcher)
    }

    /// Ping the store, retrying `connect_retries` times
    async fn await_store(&self) -> Result<()> {
        let attempts = self.config.connect_retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.store.ping().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Store not reachable");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.connect_retry_delay()).await;
                    }
                }
            }
        }

        Err(AppError::StoreUnavailable(format!(
            "store unreachable after {} attempts: {}",
            attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskState;
    use crate::error::HandlerError;
    use crate::port::event_sink::mocks::RecordingEventSink;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::memory_store::mocks::FlakyQueueStore;
    use crate::port::InMemoryQueueStore;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{sleep, Instant};

    fn fast_config() -> JobConfig {
        JobConfig {
            concurrency: 2,
            queues: BTreeMap::from([("default".to_string(), 1)]),
            poll_interval_ms: 5,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            connect_retries: 1,
            connect_retry_delay_ms: 1,
            ..Default::default()
        }
    }

    fn service(config: JobConfig) -> (JobService, Arc<RecordingEventSink>) {
        let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let events = Arc::new(RecordingEventSink::new());
        let service = JobService::new(
            config,
            Arc::new(InMemoryQueueStore::new(clock.clone())),
            Arc::new(SequentialIdProvider::new("task")),
            clock,
            events.clone(),
        )
        .unwrap();
        (service, events)
    }

    async fn wait_for_state(service: &JobService, id: &TaskId, state: TaskState) -> crate::domain::TaskEnvelope {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let task = service.store().get(id).await.unwrap().unwrap();
            if task.state == state {
                return task;
            }
            assert!(Instant::now() < deadline, "task {} stuck in {}", id, task.state);
            sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let result = JobService::with_defaults(
            JobConfig {
                concurrency: 0,
                ..Default::default()
            },
            Arc::new(InMemoryQueueStore::new(clock)),
        );
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_handled_task_is_acked() {
        let (service, events) = service(fast_config());
        service
            .register_fn("welcome_email", |_p: TaskPayload| async { Ok(()) })
            .unwrap();
        service.start().await.unwrap();

        let id = service
            .enqueue("default", "welcome_email", TaskPayload::default(), EnqueueOptions::new())
            .await
            .unwrap();
        wait_for_state(&service, &id, TaskState::Completed).await;

        let report = service.stop(Duration::from_secs(1)).await;
        assert!(report.drained);
        assert_eq!(report.stats.completed, 1);
        assert_eq!(events.completed(), vec![id]);
    }

    #[tokio::test]
    async fn test_missing_handler_goes_dead_without_retries() {
        let (service, events) = service(fast_config());
        service.start().await.unwrap();

        let id = service
            .enqueue("default", "welcome_email", TaskPayload::default(), EnqueueOptions::new())
            .await
            .unwrap();
        let task = wait_for_state(&service, &id, TaskState::Dead).await;

        assert_eq!(task.retry_count, 0);
        assert!(task.last_error.unwrap().contains("welcome_email"));
        assert_eq!(events.dead().len(), 1);
        service.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_retry_budget_gives_k_plus_one_attempts() {
        let (service, events) = service(fast_config());
        let attempts = Arc::new(AtomicUsize::new(0));
        let counted = attempts.clone();
        service
            .register_fn("flaky", move |_p: TaskPayload| {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err(HandlerError::new("smtp timeout"))
                }
            })
            .unwrap();
        service.start().await.unwrap();

        let id = service
            .enqueue(
                "default",
                "flaky",
                TaskPayload::default(),
                EnqueueOptions::new().max_retries(2),
            )
            .await
            .unwrap();
        let task = wait_for_state(&service, &id, TaskState::Dead).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(task.retry_count, 2);
        assert_eq!(task.last_error.as_deref(), Some("smtp timeout"));
        assert_eq!(events.dead()[0].0, id);

        let report = service.stop(Duration::from_secs(1)).await;
        assert_eq!(report.stats.retried, 2);
        assert_eq!(report.stats.dead, 1);
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_task() {
        let (service, _) = service(JobConfig {
            concurrency: 1,
            ..fast_config()
        });
        let started = Arc::new(tokio::sync::Notify::new());
        let signal = started.clone();
        service
            .register_fn("slow", move |_p: TaskPayload| {
                let signal = signal.clone();
                async move {
                    signal.notify_one();
                    sleep(Duration::from_millis(300)).await;
                    Ok(())
                }
            })
            .unwrap();
        service.start().await.unwrap();

        let id = service
            .enqueue("default", "slow", TaskPayload::default(), EnqueueOptions::new())
            .await
            .unwrap();
        started.notified().await;

        let begun = Instant::now();
        let report = service.stop(Duration::from_secs(5)).await;

        assert!(report.drained);
        assert_eq!(report.abandoned_workers, 0);
        assert!(begun.elapsed() < Duration::from_secs(5));
        assert_eq!(report.stats.completed, 1);
        // Store is closed after stop; the ack happened before that
        assert!(service.store().get(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_drain_timeout_abandons_worker() {
        let (service, _) = service(JobConfig {
            concurrency: 1,
            ..fast_config()
        });
        let started = Arc::new(tokio::sync::Notify::new());
        let signal = started.clone();
        service
            .register_fn("stuck", move |_p: TaskPayload| {
                let signal = signal.clone();
                async move {
                    signal.notify_one();
                    sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            })
            .unwrap();
        service.start().await.unwrap();
        service
            .enqueue("default", "stuck", TaskPayload::default(), EnqueueOptions::new())
            .await
            .unwrap();
        started.notified().await;

        let report = service.stop(Duration::from_millis(100)).await;
        assert!(!report.drained);
        assert_eq!(report.abandoned_workers, 1);
        assert_eq!(report.stats.abandoned, 1);
        assert_eq!(report.stats.executing, 0);
        assert_eq!(report.stats.completed, 0);
    }

    #[tokio::test]
    async fn test_concurrency_bound_never_exceeded() {
        let (service, _) = service(JobConfig {
            concurrency: 3,
            ..fast_config()
        });
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (running_in, peak_in) = (running.clone(), peak.clone());
        service
            .register_fn("work", move |_p: TaskPayload| {
                let running = running_in.clone();
                let peak = peak_in.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let mut ids = Vec::new();
        for _ in 0..12 {
            ids.push(
                service
                    .enqueue("default", "work", TaskPayload::default(), EnqueueOptions::new())
                    .await
                    .unwrap(),
            );
        }
        service.start().await.unwrap();
        for id in &ids {
            wait_for_state(&service, id, TaskState::Completed).await;
        }

        let report = service.stop(Duration::from_secs(1)).await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(report.stats.peak_executing <= 3);
        assert!(report.stats.peak_executing >= 1);
        assert_eq!(report.stats.completed, 12);
    }

    #[tokio::test]
    async fn test_duplicate_handler_fails_start() {
        let (service, _) = service(fast_config());
        service.register_fn("a", |_p: TaskPayload| async { Ok(()) }).unwrap();
        service.register_fn("a", |_p: TaskPayload| async { Ok(()) }).unwrap();

        let err = service.start().await.unwrap_err();
        match err {
            AppError::Startup(cause) => assert!(matches!(*cause, AppError::DuplicateHandler(_))),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!service.is_running().await);
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_start() {
        let (service, _) = service(fast_config());
        service.store().close().await;

        let err = service.start().await.unwrap_err();
        match err {
            AppError::Startup(cause) => assert!(matches!(*cause, AppError::StoreUnavailable(_))),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_after_start_rejected() {
        let (service, _) = service(fast_config());
        service.start().await.unwrap();
        assert!(service.is_running().await);
        assert!(service.register_fn("late", |_p: TaskPayload| async { Ok(()) }).is_err());
        assert!(service.start().await.is_err());
        service.shutdown().await;
        assert!(!service.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let (service, _) = service(fast_config());
        service.start().await.unwrap();
        assert!(service.stop(Duration::from_secs(1)).await.drained);
        assert!(service.stop(Duration::from_secs(1)).await.drained);
    }

    #[tokio::test]
    async fn test_failed_start_can_be_retried() {
        let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let store = Arc::new(FlakyQueueStore::new(clock.clone()));
        // connect_retries = 1 gives two pings per start()
        store.fail_pings(2);
        let service = JobService::new(
            fast_config(),
            store.clone(),
            Arc::new(SequentialIdProvider::new("task")),
            clock,
            Arc::new(RecordingEventSink::new()),
        )
        .unwrap();

        let err = service.start().await.unwrap_err();
        assert!(matches!(err, AppError::Startup(_)));
        assert!(!service.is_running().await);

        service
            .register_fn("welcome_email", |_p: TaskPayload| async { Ok(()) })
            .unwrap();
        service.start().await.unwrap();

        let id = service
            .enqueue("default", "welcome_email", TaskPayload::default(), EnqueueOptions::new())
            .await
            .unwrap();
        wait_for_state(&service, &id, TaskState::Completed).await;
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_completed_tasks_purged_after_retention() {
        let (service, _) = service(JobConfig {
            completed_retention_ms: 0,
            purge_interval_ms: 10,
            ..fast_config()
        });
        service
            .register_fn("welcome_email", |_p: TaskPayload| async { Ok(()) })
            .unwrap();
        service.start().await.unwrap();

        let done = service
            .enqueue("default", "welcome_email", TaskPayload::default(), EnqueueOptions::new())
            .await
            .unwrap();
        let dead = service
            .enqueue("default", "unknown", TaskPayload::default(), EnqueueOptions::new())
            .await
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while service.store().get(&done).await.unwrap().is_some() {
            assert!(Instant::now() < deadline, "completed task {} never purged", done);
            sleep(Duration::from_millis(5)).await;
        }
        let task = wait_for_state(&service, &dead, TaskState::Dead).await;
        assert_eq!(task.id, dead);

        let report = service.stop(Duration::from_secs(1)).await;
        assert_eq!(report.stats.completed, 1);
        assert_eq!(report.stats.dead, 1);
    }

    #[tokio::test]
    async fn test_purge_completed_respects_default_retention() {
        let (service, _) = service(fast_config());
        service
            .register_fn("welcome_email", |_p: TaskPayload| async { Ok(()) })
            .unwrap();
        service.start().await.unwrap();

        let id = service
            .enqueue("default", "welcome_email", TaskPayload::default(), EnqueueOptions::new())
            .await
            .unwrap();
        wait_for_state(&service, &id, TaskState::Completed).await;

        assert_eq!(service.purge_completed().await.unwrap(), 0);
        assert!(service.store().get(&id).await.unwrap().is_some());
        service.shutdown().await;
    }
}
