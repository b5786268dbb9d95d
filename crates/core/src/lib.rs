// jobq Core - Domain Logic, Ports & Worker Pool
// NO infrastructure dependencies (hexagonal architecture)

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod port;

pub use application::{handler_fn, EnqueueOptions, JobService, PoolStats, StopReport, TaskHandler};
pub use domain::{TaskEnvelope, TaskId, TaskPayload, TaskState};
pub use config::JobConfig;
pub use error::{AppError, HandlerError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
