use thiserror::Error;

use crate::types::SqlValue;

/// Error type for quarry operations
#[derive(Debug, Clone, Error)]
pub enum QuarryError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("No active connection")]
    NoConnection,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Query error: {0}")]
    Query(String),

    /// Raw failure reported by a driver.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A driver failure re-raised at the connection boundary with the statement
    /// that caused it.
    #[error("Execution failed: {message} (sql: {sql}, params: {params:?})")]
    Execution {
        message: String,
        sql: String,
        params: Vec<SqlValue>,
    },

    /// A statement was issued on the connection by the task that holds an open
    /// transaction; it has to go through the transaction instead.
    #[error("A transaction is open on this task; run the statement through it")]
    TransactionActive,

    #[error("Column not found: {0}")]
    ColumnNotFound(String),
}

impl QuarryError {
    pub(crate) fn execution(source: QuarryError, sql: &str, params: &[SqlValue]) -> Self {
        let message = match source {
            already @ QuarryError::Execution { .. } => return already,
            QuarryError::QueryFailed(message) => message,
            other => other.to_string(),
        };
        QuarryError::Execution {
            message,
            sql: sql.to_string(),
            params: params.to_vec(),
        }
    }
}

/// Result type alias for quarry operations
pub type Result<T> = std::result::Result<T, QuarryError>;
