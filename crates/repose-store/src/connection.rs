//! SQLite driver for the reactive connection contract
//!
//! rusqlite is synchronous, so every statement runs on tokio's blocking
//! pool while the session awaits it. The connection sits behind a mutex
//! only to be movable into those tasks; a session never has two statements
//! in flight.

use crate::db;
use crate::errors::{self, Result as StoreResult};
use crate::schema::SEQUENCE_TABLE;
use async_trait::async_trait;
use repose_core::config::DatabaseSettings;
use repose_core::connection::{ReactiveConnection, Rows};
use repose_core::errors::{ExError, ExErrorKind, ReposeError, Result};
use repose_core::model::SqlValue;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct SqliteConnection {
    inner: Arc<Mutex<Connection>>,
}

impl SqliteConnection {
    pub fn new(conn: Connection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
        }
    }

    /// Open and configure the database named by the settings
    pub fn open(settings: &DatabaseSettings) -> StoreResult<Self> {
        db::open_configured(settings).map(Self::new)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        db::open_in_memory().map(Self::new)
    }

    /// Run `f` against the raw connection on the blocking pool
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut conn = inner.lock().map_err(|_| ReposeError::Internal {
                message: "sqlite connection mutex poisoned".to_string(),
            })?;
            f(&mut *conn).map_err(errors::database)
        })
        .await
        .map_err(|e| ReposeError::Internal {
            message: format!("sqlite task failed: {}", e),
        })?
    }

    /// Synchronous access for schema export and bookkeeping that happens
    /// outside any session
    pub fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut Connection) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut conn = self.inner.lock().map_err(|_| {
            ExError::new(ExErrorKind::Internal)
                .with_op("sqlite_lock")
                .with_message("sqlite connection mutex poisoned")
        })?;
        f(&mut *conn)
    }
}

fn to_sqlite(value: SqlValue) -> SqliteValue {
    match value {
        SqlValue::Null => SqliteValue::Null,
        SqlValue::Integer(v) => SqliteValue::Integer(v),
        SqlValue::Real(v) => SqliteValue::Real(v),
        SqlValue::Text(v) => SqliteValue::Text(v),
        SqlValue::Blob(v) => SqliteValue::Blob(v),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => SqlValue::Blob(v.to_vec()),
    }
}

#[async_trait(?Send)]
impl ReactiveConnection for SqliteConnection {
    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64> {
        tracing::debug!(sql, params = params.len(), "execute");
        let sql = sql.to_string();
        let changed = self
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                stmt.execute(params_from_iter(params.into_iter().map(to_sqlite)))
            })
            .await?;
        Ok(changed as u64)
    }

    async fn insert_returning_key(&self, sql: &str, params: Vec<SqlValue>) -> Result<SqlValue> {
        tracing::debug!(sql, params = params.len(), "insert returning key");
        let sql = sql.to_string();
        self.call(move |conn| {
            conn.prepare_cached(&sql)?
                .execute(params_from_iter(params.into_iter().map(to_sqlite)))?;
            Ok(SqlValue::Integer(conn.last_insert_rowid()))
        })
        .await
    }

    async fn select(&self, sql: &str, params: Vec<SqlValue>) -> Result<Rows> {
        tracing::debug!(sql, params = params.len(), "select");
        let sql = sql.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let width = stmt.column_count();
            let rows = stmt.query_map(
                params_from_iter(params.into_iter().map(to_sqlite)),
                |row| {
                    (0..width)
                        .map(|i| row.get_ref(i).map(from_sqlite))
                        .collect::<rusqlite::Result<Vec<_>>>()
                },
            )?;
            let collected: rusqlite::Result<Rows> = rows.collect();
            collected
        })
        .await
    }

    async fn next_sequence_value(&self, sequence: &str) -> Result<i64> {
        let upsert = format!(
            "INSERT INTO {table} (name, current_value) VALUES (?1, 1) \
             ON CONFLICT(name) DO UPDATE SET current_value = current_value + 1",
            table = SEQUENCE_TABLE
        );
        let select = format!("SELECT current_value FROM {} WHERE name = ?1", SEQUENCE_TABLE);
        let name = sequence.to_string();
        let value = self
            .call(move |conn| {
                conn.execute(&upsert, [&name])?;
                conn.query_row(&select, [&name], |row| row.get(0))
            })
            .await?;
        tracing::debug!(sequence, value, "sequence advanced");
        Ok(value)
    }

    async fn begin(&self) -> Result<()> {
        self.call(|conn| conn.execute_batch("BEGIN")).await
    }

    async fn commit(&self) -> Result<()> {
        self.call(|conn| conn.execute_batch("COMMIT")).await
    }

    async fn rollback(&self) -> Result<()> {
        self.call(|conn| conn.execute_batch("ROLLBACK")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::apply_migrations;

    fn connection() -> SqliteConnection {
        let connection = SqliteConnection::open_in_memory().unwrap();
        connection.with_connection(apply_migrations).unwrap();
        connection
            .with_connection(|conn| {
                conn.execute_batch(
                    "CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, weight REAL)",
                )
                .map_err(errors::from_rusqlite)
            })
            .unwrap();
        connection
    }

    #[tokio::test]
    async fn test_insert_returning_key_reports_rowid() {
        let connection = connection();

        let first = connection
            .insert_returning_key(
                "INSERT INTO items (name) VALUES (?)",
                vec![SqlValue::Text("a".to_string())],
            )
            .await
            .unwrap();
        let second = connection
            .insert_returning_key("INSERT INTO items DEFAULT VALUES", vec![])
            .await
            .unwrap();

        assert_eq!(first, SqlValue::Integer(1));
        assert_eq!(second, SqlValue::Integer(2));
    }

    #[tokio::test]
    async fn test_select_converts_columns() {
        let connection = connection();
        connection
            .execute(
                "INSERT INTO items (id, name, weight) VALUES (?, ?, ?)",
                vec![
                    SqlValue::Integer(7),
                    SqlValue::Text("anvil".to_string()),
                    SqlValue::Real(12.5),
                ],
            )
            .await
            .unwrap();

        let rows = connection
            .select(
                "SELECT 1, name, weight FROM items WHERE id = ?",
                vec![SqlValue::Integer(7)],
            )
            .await
            .unwrap();

        assert_eq!(
            rows,
            vec![vec![
                SqlValue::Integer(1),
                SqlValue::Text("anvil".to_string()),
                SqlValue::Real(12.5),
            ]]
        );
    }

    #[tokio::test]
    async fn test_execute_reports_affected_rows() {
        let connection = connection();
        connection
            .execute("INSERT INTO items (id) VALUES (1), (2)", vec![])
            .await
            .unwrap();

        let changed = connection
            .execute("UPDATE items SET name = ?", vec![SqlValue::Text("x".to_string())])
            .await
            .unwrap();

        assert_eq!(changed, 2);
    }

    #[tokio::test]
    async fn test_sequences_start_at_one_and_are_independent() {
        let connection = connection();

        assert_eq!(connection.next_sequence_value("a").await.unwrap(), 1);
        assert_eq!(connection.next_sequence_value("a").await.unwrap(), 2);
        assert_eq!(connection.next_sequence_value("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let connection = connection();

        connection.begin().await.unwrap();
        connection
            .execute("INSERT INTO items (id) VALUES (1)", vec![])
            .await
            .unwrap();
        connection.rollback().await.unwrap();

        let rows = connection.select("SELECT id FROM items", vec![]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_sql_errors_are_database_errors() {
        let connection = connection();

        let err = connection
            .execute("INSERT INTO missing_table (id) VALUES (1)", vec![])
            .await
            .unwrap_err();

        assert!(matches!(err, ReposeError::Database { .. }));
    }
}
