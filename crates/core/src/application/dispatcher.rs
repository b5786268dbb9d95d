//! Dispatcher - task type to handler mapping
//!
//! Handlers are collected in a [`DispatcherBuilder`] at startup and frozen
//! into a [`Dispatcher`], which is cheap to clone and read by every worker
//! without locking.

use crate::application::worker::{execute_guarded, PanicGuardResult};
use crate::domain::{TaskEnvelope, TaskPayload, TaskType};
use crate::error::{AppError, HandlerError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Outcome of a single handler invocation
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Task handler
///
/// Delivery is at-least-once, so implementations must be idempotent.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: &TaskPayload) -> HandlerResult;
}

/// Adapter turning an async closure into a [`TaskHandler`]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for HandlerFn<F>
where
    F: Fn(TaskPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, payload: &TaskPayload) -> HandlerResult {
        (self.f)(payload.clone()).await
    }
}

/// Wrap an async closure as a shareable handler
///
/// # Example
/// ```text
/// let handler = handler_fn(|payload: TaskPayload| async move {
///     let email: WelcomeEmail = payload.decode_json()?;
///     send(email).await.map_err(HandlerError::from_error)
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(HandlerFn { f })
}

/// Collects handler registrations before the pool starts
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; fails on an empty or already registered task type
    pub fn register(
        &mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<&mut Self> {
        let task_type = task_type.into();
        if task_type.trim().is_empty() {
            return Err(AppError::InvalidTask("task type must not be empty".into()));
        }

        let key = TaskType::new(task_type);
        if self.handlers.contains_key(&key) {
            return Err(AppError::DuplicateHandler(key.to_string()));
        }
        self.handlers.insert(key, handler);
        Ok(self)
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: Arc::new(self.handlers),
        }
    }
}

/// Immutable dispatch table
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<HashMap<TaskType, Arc<dyn TaskHandler>>>,
}

impl Dispatcher {
    pub fn resolve(&self, task_type: &TaskType) -> Result<Arc<dyn TaskHandler>> {
        self.handlers
            .get(task_type)
            .cloned()
            .ok_or_else(|| AppError::HandlerNotFound(task_type.to_string()))
    }

    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Resolve and run the handler for an envelope.
    ///
    /// Returns `AppError::HandlerNotFound` for an unknown type and
    /// `AppError::Handler` for a returned error or a caught panic. Never panics.
    pub async fn invoke(&self, envelope: &TaskEnvelope) -> Result<()> {
        let handler = self.resolve(&envelope.task_type)?;

        debug!(
            task_id = %envelope.id,
            task_type = %envelope.task_type,
            payload_bytes = envelope.payload.len(),
            "Invoking handler"
        );

        match execute_guarded(handler.handle(&envelope.payload)).await {
            PanicGuardResult::Success(Ok(())) => Ok(()),
            PanicGuardResult::Success(Err(err)) => Err(AppError::Handler(err)),
            PanicGuardResult::Panicked(msg) => Err(AppError::Handler(HandlerError::new(format!(
                "handler panicked: {}",
                msg
            )))),
        }
    }
}
