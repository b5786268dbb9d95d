// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    /// Bad enqueue input, rejected before reaching the store
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Duplicate handler for task type: {0}")]
    DuplicateHandler(String),

    #[error("No handler registered for task type: {0}")]
    HandlerNotFound(String),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Transient store failure; callers back off and retry
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Ack/retry/fail presented a lease that is no longer current
    #[error("Lease expired for task {task_id}")]
    LeaseExpired { task_id: String },

    #[error("Startup error: {0}")]
    Startup(#[source] Box<AppError>),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wrap an error as fatal for `JobService::start`
    pub fn startup(err: AppError) -> Self {
        AppError::Startup(Box::new(err))
    }

    /// True for failures the worker loop should ride out with a backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned (or panic caught) from a task handler.
///
/// Handlers signal whether the failure is worth retrying. Anything built
/// through [`HandlerError::new`] or [`HandlerError::from_error`] is retryable;
/// use [`HandlerError::terminal`] for failures a retry cannot fix.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    retryable: bool,
    #[source]
    cause: Option<BoxedCause>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            cause: None,
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            cause: None,
        }
    }

    /// Wrap an arbitrary error, keeping it as the source
    pub fn from_error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: err.to_string(),
            retryable: true,
            cause: Some(Box::new(err)),
        }
    }

    /// Mark this error as not worth retrying
    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

// A payload that does not decode will not decode on the next attempt either
impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::from_error(err).non_retryable()
    }
}
