//! Weighted queue selection and delayed delivery

mod common;

use common::{fast_config, service, wait_for_state, TestDb};
use jobq_core::domain::{TaskPayload, TaskState};
use jobq_core::port::event_sink::mocks::RecordingEventSink;
use jobq_core::port::id_provider::mocks::SequentialIdProvider;
use jobq_core::port::time_provider::SystemTimeProvider;
use jobq_core::port::{QueueStore, TimeProvider};
use jobq_core::EnqueueOptions;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_single_worker_follows_queue_weights() {
    let db = TestDb::new();
    let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = db.store(clock.clone()).await;

    let mut config = fast_config(1);
    config.queues = BTreeMap::from([("high".to_string(), 3), ("low".to_string(), 1)]);
    let service = service(
        config,
        store.clone(),
        Arc::new(SequentialIdProvider::new("fair")),
        clock,
        Arc::new(RecordingEventSink::new()),
    );

    let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let log = order.clone();
    service
        .register_fn("tag", move |payload: TaskPayload| {
            let log = log.clone();
            async move {
                let queue = String::from_utf8_lossy(payload.as_bytes()).into_owned();
                log.lock().unwrap().push(queue);
                Ok(())
            }
        })
        .unwrap();

    let mut last = None;
    for _ in 0..20 {
        for queue in ["high", "low"] {
            let id = service
                .enqueue(queue, "tag", TaskPayload::new(queue.as_bytes().to_vec()), EnqueueOptions::new())
                .await
                .unwrap();
            last = Some(id);
        }
    }
    service.start().await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while order.lock().unwrap().len() < 8 {
        assert!(Instant::now() < deadline, "workers made no progress");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let first_eight: Vec<String> = order.lock().unwrap()[..8].to_vec();
    let high = first_eight.iter().filter(|q| q.as_str() == "high").count();
    assert_eq!(high, 6, "order was {:?}", first_eight);
    assert_eq!(8 - high, 2);

    // Low is never starved: at most 3 consecutive highs while both have work
    let mut run = 0;
    for queue in &first_eight {
        run = if queue == "high" { run + 1 } else { 0 };
        assert!(run <= 3, "order was {:?}", first_eight);
    }

    if let Some(id) = last {
        wait_for_state(store.as_ref(), &id, TaskState::Completed).await;
    }
    let report = service.stop(Duration::from_secs(1)).await;
    assert_eq!(report.stats.completed, 40);
    assert_eq!(report.stats.peak_executing, 1);
}

#[tokio::test]
async fn test_delayed_task_not_delivered_early() {
    let db = TestDb::new();
    let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = db.store(clock.clone()).await;
    let service = service(
        fast_config(2),
        store.clone(),
        Arc::new(SequentialIdProvider::new("later")),
        clock,
        Arc::new(RecordingEventSink::new()),
    );

    let ran_at: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    let slot = ran_at.clone();
    service
        .register_fn("reminder", move |_payload: TaskPayload| {
            let slot = slot.clone();
            async move {
                *slot.lock().unwrap() = Some(Instant::now());
                Ok(())
            }
        })
        .unwrap();
    service.start().await.unwrap();

    let enqueued_at = Instant::now();
    let id = service
        .enqueue(
            "default",
            "reminder",
            TaskPayload::default(),
            EnqueueOptions::new().delay(Duration::from_millis(400)),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        store.get(&id).await.unwrap().unwrap().state,
        TaskState::Pending
    );

    wait_for_state(store.as_ref(), &id, TaskState::Completed).await;
    let ran_at = ran_at.lock().unwrap().unwrap();
    // Store timestamps are whole milliseconds
    assert!(ran_at.duration_since(enqueued_at) >= Duration::from_millis(399));

    service.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_empty_queue_does_not_block_others() {
    let db = TestDb::new();
    let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = db.store(clock.clone()).await;
    let service = service(
        fast_config(1),
        store.clone(),
        Arc::new(SequentialIdProvider::new("only")),
        clock,
        Arc::new(RecordingEventSink::new()),
    );
    service
        .register_fn("noop", |_payload: TaskPayload| async { Ok(()) })
        .unwrap();
    service.start().await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(
            service
                .enqueue("low", "noop", TaskPayload::default(), EnqueueOptions::new())
                .await
                .unwrap(),
        );
    }
    for id in &ids {
        wait_for_state(store.as_ref(), id, TaskState::Completed).await;
    }
    assert_eq!(store.count_by_state("low", TaskState::Completed).await.unwrap(), 5);

    service.stop(Duration::from_secs(1)).await;
}
