use repose_core::sql::{ColumnType, Dialect};

/// SQLite's type affinities
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn column_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Boolean | ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            // UUIDs and RFC 3339 timestamps are bound as text
            ColumnType::Text | ColumnType::Uuid | ColumnType::Timestamp => "TEXT",
        }
    }

    fn identity_column(&self) -> &'static str {
        "INTEGER PRIMARY KEY AUTOINCREMENT"
    }
}
