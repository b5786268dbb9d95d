//! Shared fixtures: a throwaway SQLite file per test

#![allow(dead_code)]

use jobq_core::domain::{TaskEnvelope, TaskId, TaskState};
use jobq_core::port::{IdProvider, JobEventSink, QueueStore, TimeProvider};
use jobq_core::{JobConfig, JobService};
use jobq_infra_sqlite::{create_pool, run_migrations, SqliteQueueStore};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Temporary database file, removed (with its WAL files) on drop
pub struct TestDb {
    pub path: PathBuf,
}

impl TestDb {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("jobq-it-{}.db", uuid::Uuid::new_v4()));
        Self { path }
    }

    pub fn url(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Fresh pool on the same file; each call is an independent "process"
    pub async fn store(&self, clock: Arc<dyn TimeProvider>) -> Arc<SqliteQueueStore> {
        let pool = create_pool(&self.url()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        Arc::new(SqliteQueueStore::new(pool, clock))
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

/// Fast timings so retries and idle polls do not slow tests down
pub fn fast_config(concurrency: usize) -> JobConfig {
    JobConfig {
        concurrency,
        queues: BTreeMap::from([
            ("critical".to_string(), 6),
            ("default".to_string(), 3),
            ("low".to_string(), 2),
        ]),
        poll_interval_ms: 5,
        backoff_base_ms: 1,
        backoff_max_ms: 10,
        connect_retries: 0,
        connect_retry_delay_ms: 1,
        ..Default::default()
    }
}

pub fn service(
    config: JobConfig,
    store: Arc<dyn QueueStore>,
    ids: Arc<dyn IdProvider>,
    clock: Arc<dyn TimeProvider>,
    events: Arc<dyn JobEventSink>,
) -> JobService {
    JobService::new(config, store, ids, clock, events).unwrap()
}

/// Poll the store until the task reaches `state` (5 s budget)
pub async fn wait_for_state(store: &dyn QueueStore, id: &TaskId, state: TaskState) -> TaskEnvelope {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let task = store.get(id).await.unwrap().unwrap();
        if task.state == state {
            return task;
        }
        assert!(
            Instant::now() < deadline,
            "task {} stuck in {} (wanted {})",
            id,
            task.state,
            state
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
