//! Repose Store - SQLite backend for the persistence pipeline
//!
//! Provides:
//! - [`SqliteConnection`], the reactive connection contract over rusqlite
//! - SQLite dialect and schema export from a mapping registry
//! - Migrations framework with checksums recorded in `schema_version`
//! - YAML graph seeds: parse, import through a session, read back

pub mod connection;
pub mod db;
pub mod dialect;
pub mod errors;
pub mod migrations;
pub mod schema;
pub mod seed;
pub mod snapshot;

// Re-export key types
pub use connection::SqliteConnection;
pub use dialect::SqliteDialect;
pub use errors::Result;
