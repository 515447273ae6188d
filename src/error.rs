//! Error types for the store.
//!
//! This module defines all error types using `thiserror`. Driver failures are
//! categorized by the `From<sqlx::Error>` conversion; transaction orchestration
//! wraps errors with a stage label so failures are distinguishable by stage.

use std::time::Duration;

use thiserror::Error;

use crate::config::DEFAULT_ACQUIRE_TIMEOUT_SECS;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout { operation: String, elapsed_secs: u64 },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Failure while starting a new transaction. Nothing was opened.
    #[error("begin transaction: {source}")]
    Begin {
        #[source]
        source: sqlx::Error,
    },

    /// Failure returned by the transaction callback, or by a nested call.
    #[error("execute transaction: {source}")]
    Execute {
        #[source]
        source: Box<DbError>,
    },

    #[error("commit transaction: {source}")]
    Commit {
        #[source]
        source: sqlx::Error,
    },

    /// Rollback failed during cleanup. Keeps both the rollback failure and
    /// the error that triggered the rollback.
    #[error("rollback transaction ({rollback}): {source}")]
    Rollback {
        rollback: String,
        #[source]
        source: Box<DbError>,
    },

    /// Health-check failure. `elapsed` is the measured round-trip time up to
    /// the point of failure.
    #[error("ping database after {elapsed:?}: {source}")]
    Ping {
        elapsed: Duration,
        #[source]
        source: sqlx::Error,
    },

    #[error("Transaction has already been committed or rolled back")]
    TransactionClosed,
}

impl DbError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap a begin-transaction failure.
    pub fn begin(source: sqlx::Error) -> Self {
        Self::Begin { source }
    }

    /// Wrap a callback failure with the execute stage label.
    pub fn execute(source: DbError) -> Self {
        Self::Execute {
            source: Box::new(source),
        }
    }

    /// Wrap a commit failure.
    pub fn commit(source: sqlx::Error) -> Self {
        Self::Commit { source }
    }

    /// Merge a rollback failure with the error that triggered the rollback.
    pub fn rollback(rollback: sqlx::Error, cause: DbError) -> Self {
        Self::Rollback {
            rollback: rollback.to_string(),
            source: Box::new(cause),
        }
    }

    /// Wrap a health-check failure together with the measured duration.
    pub fn ping(elapsed: Duration, source: sqlx::Error) -> Self {
        Self::Ping { elapsed, source }
    }

    /// Get the SQLSTATE code for this error, if the database reported one.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is worth retrying. A failed begin left nothing
    /// open, so it is always safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Begin { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::config(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::database("No rows returned", None),
            sqlx::Error::PoolTimedOut => {
                DbError::timeout("connection pool acquire", DEFAULT_ACQUIRE_TIMEOUT_SECS)
            }
            sqlx::Error::PoolClosed => DbError::connection("Connection pool is closed"),
            sqlx::Error::Io(io_err) => DbError::connection(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => DbError::connection(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => {
                DbError::connection(format!("Protocol error: {}", msg))
            }
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::schema(format!("Type not found: {}", type_name), type_name)
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col)
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::Encode(source) => {
                DbError::internal(format!("Failed to encode parameter: {}", source))
            }
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_stage_labels() {
        let begin = DbError::begin(sqlx::Error::PoolClosed);
        assert!(begin.to_string().starts_with("begin transaction:"));

        let execute = DbError::execute(DbError::internal("boom"));
        assert!(execute.to_string().starts_with("execute transaction:"));
        assert!(execute.to_string().contains("boom"));

        let commit = DbError::commit(sqlx::Error::PoolClosed);
        assert!(commit.to_string().starts_with("commit transaction:"));
    }

    #[test]
    fn test_rollback_merges_both_messages() {
        let cause = DbError::execute(DbError::internal("original failure"));
        let err = DbError::rollback(sqlx::Error::PoolClosed, cause);
        let message = err.to_string();
        assert!(message.starts_with("rollback transaction"));
        assert!(message.contains("pool"));
        assert!(message.contains("original failure"));
    }

    #[test]
    fn test_nested_execute_wraps_per_layer() {
        let inner = DbError::execute(DbError::internal("boom"));
        let outer = DbError::execute(inner);
        assert_eq!(outer.to_string().matches("execute transaction:").count(), 2);
    }

    #[test]
    fn test_ping_error_keeps_elapsed() {
        let err = DbError::ping(Duration::from_millis(12), sqlx::Error::PoolClosed);
        assert!(err.to_string().contains("ping database"));
        match err {
            DbError::Ping { elapsed, .. } => assert_eq!(elapsed, Duration::from_millis(12)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_row_not_found_maps_to_database() {
        let err = DbError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, DbError::Database { .. }));
        assert!(err.to_string().contains("No rows returned"));
    }

    #[test]
    fn test_pool_timeout_maps_to_timeout() {
        let err = DbError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, DbError::Timeout { .. }));
    }

    #[test]
    fn test_sql_state_accessor() {
        let err = DbError::database("relation does not exist", Some("42P01".to_string()));
        assert_eq!(err.sql_state(), Some("42P01"));
        assert_eq!(DbError::internal("nope").sql_state(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", 30).is_retryable());
        assert!(DbError::connection("err").is_retryable());
        assert!(DbError::begin(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!DbError::internal("err").is_retryable());
        assert!(!DbError::TransactionClosed.is_retryable());
    }
}
