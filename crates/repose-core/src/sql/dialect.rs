use crate::model::value::IdType;
use std::fmt;

/// Logical column types used in generated DDL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Integer,
    Real,
    Text,
    Uuid,
    Timestamp,
}

impl From<IdType> for ColumnType {
    fn from(id_type: IdType) -> Self {
        match id_type {
            IdType::Long => ColumnType::Integer,
            IdType::Text => ColumnType::Text,
            IdType::Uuid => ColumnType::Uuid,
        }
    }
}

/// Database-specific formatting
pub trait Dialect: Send + Sync + fmt::Debug {
    fn quote(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    /// Placeholder for the parameter at 1-based `index`
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn column_type(&self, column_type: ColumnType) -> &'static str;

    /// Column definition suffix for a database-generated primary key
    fn identity_column(&self) -> &'static str;

    /// Statement used for an insert that binds no columns at all
    fn empty_insert(&self, table: &str) -> String {
        format!("INSERT INTO {} DEFAULT VALUES", self.quote(table))
    }
}

/// ANSI-flavoured defaults
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardDialect;

impl Dialect for StandardDialect {
    fn column_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "BIGINT",
            ColumnType::Real => "DOUBLE PRECISION",
            ColumnType::Text => "VARCHAR(255)",
            ColumnType::Uuid => "CHAR(36)",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    fn identity_column(&self) -> &'static str {
        "BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY"
    }
}
