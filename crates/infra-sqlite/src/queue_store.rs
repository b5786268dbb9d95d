// SQLite QueueStore Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use jobq_core::domain::{
    DomainError, LeaseId, QueueName, TaskEnvelope, TaskId, TaskPayload, TaskState, TaskType,
};
use jobq_core::error::{AppError, Result};
use jobq_core::port::time_provider::millis_after;
use jobq_core::port::{Lease, QueueStore, TimeProvider};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct SqliteQueueStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Explain why a lease-guarded update touched no row
    async fn diagnose_miss(&self, id: &TaskId, lease_id: &LeaseId) -> AppError {
        let row: std::result::Result<Option<LeaseCheck>, sqlx::Error> = sqlx::query_as(
            "SELECT state, lease_id, retry_count, max_retries FROM tasks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Err(e) => map_sqlx_error(e),
            Ok(None) => AppError::NotFound(format!("Task {} not found", id)),
            Ok(Some(current)) => {
                let holds_lease = current.state == TaskState::Leased.as_str()
                    && current.lease_id.as_deref() == Some(lease_id.as_str());
                if holds_lease && current.retry_count >= current.max_retries {
                    AppError::Domain(DomainError::RetryBudgetExhausted {
                        task_id: id.clone(),
                        max_retries: u32::try_from(current.max_retries).unwrap_or(u32::MAX),
                    })
                } else {
                    AppError::LeaseExpired {
                        task_id: id.clone(),
                    }
                }
            }
        }
    }

    async fn lease_from_queue(
        &self,
        queue: &str,
        lease_id: &str,
        now: i64,
        expires_at: i64,
    ) -> Result<Option<TaskEnvelope>> {
        // Single statement: SQLite takes the write lock up front, so two
        // callers can never select the same row
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            UPDATE tasks
            SET state = ?, lease_id = ?, lease_expires_at = ?
            WHERE seq = (
                SELECT seq FROM tasks
                WHERE queue = ?
                  AND (
                      (state = ? AND available_at <= ?)
                      OR (state = ? AND lease_expires_at <= ?)
                  )
                ORDER BY seq ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(TaskState::Leased.as_str())
        .bind(lease_id)
        .bind(expires_at)
        .bind(queue)
        .bind(TaskState::Pending.as_str())
        .bind(now)
        .bind(TaskState::Leased.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(TaskRow::into_envelope).transpose()
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn push(&self, envelope: &TaskEnvelope) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, queue, task_type, payload, state,
                retry_count, max_retries, lease_id, lease_expires_at,
                available_at, created_at, finished_at, last_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&envelope.id)
        .bind(&envelope.queue)
        .bind(envelope.task_type.as_str())
        .bind(envelope.payload.as_bytes())
        .bind(envelope.state.as_str())
        .bind(i64::from(envelope.retry_count))
        .bind(i64::from(envelope.max_retries))
        .bind(&envelope.lease_id)
        .bind(envelope.lease_expires_at)
        .bind(envelope.available_at)
        .bind(envelope.created_at)
        .bind(envelope.finished_at)
        .bind(&envelope.last_error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn lease(&self, queues: &[QueueName], lease_duration: Duration) -> Result<Option<Lease>> {
        let now = self.time_provider.now_millis();
        let expires_at = millis_after(now, lease_duration);
        let lease_id = uuid::Uuid::new_v4().to_string();

        for queue in queues {
            if let Some(envelope) = self
                .lease_from_queue(queue, &lease_id, now, expires_at)
                .await?
            {
                debug!(task_id = %envelope.id, queue = %queue, expires_at, "Lease granted");
                return Ok(Some(Lease {
                    envelope,
                    lease_id,
                    expires_at,
                }));
            }
        }
        Ok(None)
    }

    async fn ack(&self, id: &TaskId, lease_id: &LeaseId) -> Result<()> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = ?, finished_at = ?, lease_id = NULL, lease_expires_at = NULL
            WHERE id = ? AND state = ? AND lease_id = ?
            "#,
        )
        .bind(TaskState::Completed.as_str())
        .bind(now)
        .bind(id)
        .bind(TaskState::Leased.as_str())
        .bind(lease_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.diagnose_miss(id, lease_id).await);
        }
        Ok(())
    }

    async fn retry(
        &self,
        id: &TaskId,
        lease_id: &LeaseId,
        delay: Duration,
        error: &str,
    ) -> Result<()> {
        let available_at = millis_after(self.time_provider.now_millis(), delay);
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = ?, retry_count = retry_count + 1, available_at = ?, last_error = ?,
                lease_id = NULL, lease_expires_at = NULL
            WHERE id = ? AND state = ? AND lease_id = ? AND retry_count < max_retries
            "#,
        )
        .bind(TaskState::Pending.as_str())
        .bind(available_at)
        .bind(error)
        .bind(id)
        .bind(TaskState::Leased.as_str())
        .bind(lease_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.diagnose_miss(id, lease_id).await);
        }
        Ok(())
    }

    async fn fail(&self, id: &TaskId, lease_id: &LeaseId, error: &str) -> Result<()> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = ?, finished_at = ?, last_error = ?, lease_id = NULL, lease_expires_at = NULL
            WHERE id = ? AND state = ? AND lease_id = ?
            "#,
        )
        .bind(TaskState::Dead.as_str())
        .bind(now)
        .bind(error)
        .bind(id)
        .bind(TaskState::Leased.as_str())
        .bind(lease_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.diagnose_miss(id, lease_id).await);
        }
        Ok(())
    }

    async fn release(&self, id: &TaskId, lease_id: &LeaseId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = ?, lease_id = NULL, lease_expires_at = NULL
            WHERE id = ? AND state = ? AND lease_id = ?
            "#,
        )
        .bind(TaskState::Pending.as_str())
        .bind(id)
        .bind(TaskState::Leased.as_str())
        .bind(lease_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.diagnose_miss(id, lease_id).await);
        }
        Ok(())
    }

    async fn purge_completed(&self, finished_before: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE state = ?
              AND finished_at IS NOT NULL
              AND finished_at < ?
            "#,
        )
        .bind(TaskState::Completed.as_str())
        .bind(finished_before)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let purged = result.rows_affected();
        debug!(purged, finished_before, "Purged completed tasks");
        Ok(purged)
    }

    async fn get(&self, id: &TaskId) -> Result<Option<TaskEnvelope>> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(TaskRow::into_envelope).transpose()
    }

    async fn count_by_state(&self, queue: &str, state: TaskState) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE queue = ? AND state = ?")
                .bind(queue)
                .bind(state.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(count)
    }

    async fn dead_tasks(&self, queue: &str) -> Result<Vec<TaskEnvelope>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"
            SELECT * FROM tasks
            WHERE queue = ? AND state = ?
            ORDER BY finished_at ASC, seq ASC
            "#,
        )
        .bind(queue)
        .bind(TaskState::Dead.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(TaskRow::into_envelope).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LeaseCheck {
    state: String,
    lease_id: Option<String>,
    retry_count: i64,
    max_retries: i64,
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    #[allow(dead_code)]
    seq: i64,
    id: String,
    queue: String,
    task_type: String,
    payload: Vec<u8>,
    state: String,
    retry_count: i64,
    max_retries: i64,
    lease_id: Option<String>,
    lease_expires_at: Option<i64>,
    available_at: i64,
    created_at: i64,
    finished_at: Option<i64>,
    last_error: Option<String>,
}

impl TaskRow {
    fn into_envelope(self) -> Result<TaskEnvelope> {
        let state = TaskState::from_str(&self.state)?;
        let retry_count = column_u32("retry_count", self.retry_count)?;
        let max_retries = column_u32("max_retries", self.max_retries)?;

        Ok(TaskEnvelope {
            id: self.id,
            queue: self.queue,
            task_type: TaskType::new(self.task_type),
            payload: TaskPayload::new(self.payload),
            state,
            retry_count,
            max_retries,
            lease_id: self.lease_id,
            lease_expires_at: self.lease_expires_at,
            available_at: self.available_at,
            created_at: self.created_at,
            finished_at: self.finished_at,
            last_error: self.last_error,
        })
    }
}

fn column_u32(column: &str, value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| AppError::Database(format!("Column {} out of range: {}", column, value)))
}
