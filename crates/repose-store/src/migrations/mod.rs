//! Migration framework
//!
//! Provides:
//! - Migration runner with checksums and idempotent application
//! - Embedded SQL for the store's own support tables
//!
//! Mapped entity tables are recorded through the same runner by
//! [`crate::schema::export_schema`].

mod checksums;
mod embedded;
mod runner;

pub use checksums::compute_checksum;
pub use embedded::{get_migrations, Migration};
pub use runner::{applied_migrations, apply_migration, apply_migrations, AppliedMigration};
