// jobq Infrastructure - SQLite Adapter
// Implements: QueueStore

mod connection;
mod error;
mod migration;
mod queue_store;

pub use connection::{create_pool, DEFAULT_MAX_CONNECTIONS};
pub use migration::run_migrations;
pub use queue_store::SqliteQueueStore;

// Note: sqlx::Error conversion goes through `error::map_sqlx_error`
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
