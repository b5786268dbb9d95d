// sqlx::Error -> AppError

use jobq_core::error::AppError;

/// SQLite primary result codes (https://www.sqlite.org/rescode.html)
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;
const SQLITE_FULL: i64 = 13;
const SQLITE_CANTOPEN: i64 = 14;

/// Helper to convert sqlx::Error to AppError with structured information
///
/// Lock contention and connection/pool failures are transient
/// (`StoreUnavailable`); everything else is a `Database` error.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let Some(code) = db_err.code() else {
                return AppError::Database(format!("Database error: {}", db_err.message()));
            };
            let code_str = code.as_ref();

            // Extended codes carry the primary code in the low byte
            match code_str.parse::<i64>().map(|c| c & 0xff) {
                Ok(SQLITE_BUSY) | Ok(SQLITE_LOCKED) => AppError::StoreUnavailable(format!(
                    "Database locked ({}): {}",
                    code_str,
                    db_err.message()
                )),
                Ok(SQLITE_CANTOPEN) => AppError::StoreUnavailable(format!(
                    "Cannot open database: {}",
                    db_err.message()
                )),
                Ok(SQLITE_FULL) => AppError::Database(format!("Database full: {}", db_err.message())),
                _ if db_err.is_unique_violation() => AppError::Database(format!(
                    "Unique constraint violation: {} ({})",
                    db_err.message(),
                    code_str
                )),
                _ if db_err.is_check_violation() => AppError::Database(format!(
                    "Check constraint violation: {} ({})",
                    db_err.message(),
                    code_str
                )),
                _ => AppError::Database(format!(
                    "Database error [{}]: {}",
                    code_str,
                    db_err.message()
                )),
            }
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_) => AppError::StoreUnavailable(err.to_string()),
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => AppError::Database(format!("Column not found: {}", col)),
        _ => AppError::Database(err.to_string()),
    }
}
