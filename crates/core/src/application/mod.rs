// Application Layer - Use Cases and Worker Pool

pub mod dispatcher;
pub mod job_service;
pub mod maintenance;
pub mod retry;
pub mod worker;

// Re-exports
pub use dispatcher::{handler_fn, Dispatcher, DispatcherBuilder, HandlerResult, TaskHandler};
pub use job_service::{EnqueueOptions, JobService};
pub use maintenance::RetentionSweeper;
pub use retry::{next_delay, BackoffPolicy, RetryDecision, RetryPolicy};
pub use worker::{shutdown_channel, PoolStats, ShutdownSender, ShutdownToken, StopReport, Worker};
