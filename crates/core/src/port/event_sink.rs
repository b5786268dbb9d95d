// Job Event Sink Port - completion and dead-set signals for monitoring

use crate::domain::TaskEnvelope;
use tracing::{error, info};

/// Receives task outcomes from the worker pool.
///
/// Called inline by workers after the store accepted the outcome, so
/// implementations must be cheap and must not block.
pub trait JobEventSink: Send + Sync {
    fn on_completed(&self, envelope: &TaskEnvelope);

    /// Terminal failure: the envelope is now in the dead set
    fn on_dead(&self, envelope: &TaskEnvelope, reason: &str);
}

/// Default sink: structured log lines
pub struct TracingEventSink;

impl JobEventSink for TracingEventSink {
    fn on_completed(&self, envelope: &TaskEnvelope) {
        info!(
            task_id = %envelope.id,
            queue = %envelope.queue,
            task_type = %envelope.task_type,
            attempt = envelope.attempt(),
            "Task completed"
        );
    }

    fn on_dead(&self, envelope: &TaskEnvelope, reason: &str) {
        error!(
            task_id = %envelope.id,
            queue = %envelope.queue,
            task_type = %envelope.task_type,
            attempt = envelope.attempt(),
            reason = %reason,
            "Task moved to dead set"
        );
    }
}

pub mod mocks {
    use super::*;
    use crate::domain::TaskId;
    use std::sync::Mutex;

    /// Records every signal for assertions
    #[derive(Default)]
    pub struct RecordingEventSink {
        completed: Mutex<Vec<TaskId>>,
        dead: Mutex<Vec<(TaskId, String)>>,
    }

    impl RecordingEventSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn completed(&self) -> Vec<TaskId> {
            self.completed.lock().unwrap().clone()
        }

        pub fn dead(&self) -> Vec<(TaskId, String)> {
            self.dead.lock().unwrap().clone()
        }
    }

    impl JobEventSink for RecordingEventSink {
        fn on_completed(&self, envelope: &TaskEnvelope) {
            self.completed.lock().unwrap().push(envelope.id.clone());
        }

        fn on_dead(&self, envelope: &TaskEnvelope, reason: &str) {
            self.dead
                .lock()
                .unwrap()
                .push((envelope.id.clone(), reason.to_string()));
        }
    }
}
