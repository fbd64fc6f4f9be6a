use async_trait::async_trait;

use crate::error::Result;
use crate::types::{RawQueryResult, SqlValue};

/// What a data-modifying statement reported back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOutcome {
    pub rows_affected: u64,
    /// Identifier generated by the statement, when the backend exposes one.
    pub last_insert_id: Option<i64>,
}

impl ExecuteOutcome {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            last_insert_id: None,
        }
    }
}

/// Trait for database driver implementations.
/// Drivers are responsible for:
/// - Connecting to the database
/// - Binding `?` placeholders positionally (1-indexed) from the parameter slice
/// - Executing statements and converting results to RawQueryResult
/// - Issuing transaction control on their single handle
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Run a statement that returns rows.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<RawQueryResult>;

    /// Run a statement that modifies data.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ExecuteOutcome>;

    /// Run an INSERT and report the generated identifier if there is one.
    async fn insert(&self, sql: &str, params: &[SqlValue]) -> Result<ExecuteOutcome> {
        self.execute(sql, params).await
    }

    async fn begin(&self) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;
}
