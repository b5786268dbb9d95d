//! Unit tests for enqueue validation

use super::*;
use crate::domain::TaskState;
use crate::port::id_provider::mocks::SequentialIdProvider;
use crate::port::time_provider::mocks::ManualTimeProvider;
use crate::port::InMemoryQueueStore;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn request(queue: &str, task_type: &str) -> EnqueueRequest {
    EnqueueRequest {
        queue: queue.to_string(),
        task_type: task_type.to_string(),
        payload: TaskPayload::new(br#"{"to":"a@x.com"}"#.to_vec()),
        options: EnqueueOptions::default(),
    }
}

#[test]
fn test_validate_accepts_known_queue() {
    let config = JobConfig::default();
    assert_ok!(validate_request(&request("default", "welcome_email"), &config));
    assert_ok!(validate_request(&request("low", &"t".repeat(MAX_NAME_LEN)), &config));
}

#[test]
fn test_validate_task_type_empty() {
    let result = validate_request(&request("default", ""), &JobConfig::default());
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("empty"));
}

#[test]
fn test_validate_queue_name_empty() {
    let err = assert_err!(validate_request(&request("  ", "welcome_email"), &JobConfig::default()));
    assert!(matches!(err, AppError::InvalidTask(_)));
}

#[test]
fn test_validate_task_type_too_long() {
    let result = validate_request(&request("default", &"a".repeat(256)), &JobConfig::default());
    assert!(result.unwrap_err().to_string().contains("too long"));
}

#[test]
fn test_validate_task_type_null_byte() {
    let result = validate_request(&request("default", "welcome\0email"), &JobConfig::default());
    assert!(result.unwrap_err().to_string().contains("null"));
}

#[test]
fn test_validate_unknown_queue() {
    let result = validate_request(&request("urgent", "welcome_email"), &JobConfig::default());
    let msg = result.unwrap_err().to_string();
    assert!(msg.contains("Unknown queue 'urgent'"));
    assert!(msg.contains("critical"));
}

#[test]
fn test_validate_payload_too_large() {
    let mut req = request("default", "import");
    req.payload = TaskPayload::new(vec![0u8; MAX_PAYLOAD_BYTES + 1]);
    let result = validate_request(&req, &JobConfig::default());
    assert!(result.unwrap_err().to_string().contains("Payload too large"));
}

#[test]
fn test_validate_max_retries_out_of_range() {
    let mut req = request("default", "welcome_email");
    req.options = EnqueueOptions::new().max_retries(MAX_RETRIES_LIMIT + 1);
    let result = validate_request(&req, &JobConfig::default());
    assert!(result.unwrap_err().to_string().contains("out of range"));
}

#[tokio::test]
async fn test_execute_pushes_pending_envelope() {
    let clock = Arc::new(ManualTimeProvider::new(5_000));
    let store = InMemoryQueueStore::new(clock.clone());
    let ids = SequentialIdProvider::new("task");
    let config = JobConfig::default();

    let id = execute(&store, &ids, clock.as_ref(), &config, request("critical", "welcome_email"))
        .await
        .unwrap();
    assert_eq!(id, "task-1");

    let stored = store.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.state, TaskState::Pending);
    assert_eq!(stored.queue, "critical");
    assert_eq!(stored.max_retries, config.default_max_retries);
    assert_eq!(stored.available_at, 5_000);
}

#[tokio::test]
async fn test_execute_applies_options() {
    let clock = Arc::new(ManualTimeProvider::new(5_000));
    let store = InMemoryQueueStore::new(clock.clone());
    let ids = SequentialIdProvider::new("task");

    let mut req = request("low", "digest");
    req.options = EnqueueOptions::new()
        .max_retries(0)
        .delay(Duration::from_secs(2));
    let id = execute(&store, &ids, clock.as_ref(), &JobConfig::default(), req)
        .await
        .unwrap();

    let stored = store.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.max_retries, 0);
    assert_eq!(stored.available_at, 7_000);
}

#[tokio::test]
async fn test_execute_rejects_before_store() {
    let clock = Arc::new(ManualTimeProvider::new(5_000));
    let store = InMemoryQueueStore::new(clock.clone());
    let ids = SequentialIdProvider::new("task");

    let result = execute(&store, &ids, clock.as_ref(), &JobConfig::default(), request("nope", "x")).await;
    assert!(matches!(result, Err(AppError::InvalidTask(_))));
    assert_eq!(store.count_by_state("nope", TaskState::Pending).await.unwrap(), 0);
}
