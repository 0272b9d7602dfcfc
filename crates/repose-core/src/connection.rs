//! The single logical database connection a session talks through

use crate::errors::Result;
use crate::model::value::SqlValue;
use async_trait::async_trait;

/// Rows as returned by [`ReactiveConnection::select`], columns in select order
pub type Rows = Vec<Vec<SqlValue>>;

/// Non-blocking driver contract
///
/// Parameters bind positionally in the order given. A session never issues
/// two statements concurrently on the same connection, so implementations
/// need not be re-entrant. Futures are not required to be `Send`: a session
/// and everything it awaits stays on one task.
#[async_trait(?Send)]
pub trait ReactiveConnection {
    /// Execute a write statement, returning the number of affected rows
    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64>;

    /// Execute an insert and return the key generated for the new row
    async fn insert_returning_key(&self, sql: &str, params: Vec<SqlValue>) -> Result<SqlValue>;

    async fn select(&self, sql: &str, params: Vec<SqlValue>) -> Result<Rows>;

    /// Advance the named sequence and return its new value
    async fn next_sequence_value(&self, sequence: &str) -> Result<i64>;

    async fn begin(&self) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;
}
