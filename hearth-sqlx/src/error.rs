//! Error types for the SQL store.

use hearth_session::SessionError;
use thiserror::Error;

/// Result type for SQL store operations.
pub type SqlKvResult<T> = Result<T, SqlKvError>;

/// SQL store errors.
#[derive(Debug, Error)]
pub enum SqlKvError {
    /// Database driver error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Table names are interpolated into queries and must be plain identifiers
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),
}

impl From<SqlKvError> for SessionError {
    fn from(e: SqlKvError) -> Self {
        SessionError::Backend(e.to_string())
    }
}
