//! SQL text generation for the handful of statements the pipeline issues

pub mod dialect;
pub mod statements;

pub use dialect::{ColumnType, Dialect, StandardDialect};
pub use statements::EntityStatements;
