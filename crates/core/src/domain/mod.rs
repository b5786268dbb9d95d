// Domain Layer - Pure business logic and entities

pub mod error;
pub mod queue;
pub mod task;

// Re-exports
pub use error::DomainError;
pub use queue::{QueueConfig, QueueName};
pub use task::{LeaseId, TaskEnvelope, TaskId, TaskPayload, TaskState, TaskType};
