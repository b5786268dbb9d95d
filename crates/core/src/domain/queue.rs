// Queue Domain Model

/// Queue identifier ("critical", "default", "low", ...)
pub type QueueName = String;

/// A named queue and its share of the worker pool's concurrency budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: QueueName,
    pub weight: u32,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}
