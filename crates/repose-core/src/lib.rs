//! Repose Core - reactive persistence pipeline
//!
//! This crate turns mutations of an in-memory object graph into ordered,
//! asynchronously executed database writes:
//! - Persistence context (first-level cache with identity and lifecycle invariants)
//! - Deferred-action queue (inserts, updates, deletes in rank order)
//! - Identifier generation (assigned, sequence, table, UUID, identity)
//! - Cascade walker and the save, merge, remove, refresh, lock and flush pipelines
//! - Snapshot loader for reading current database state
//!
//! The driver is consumed through [`connection::ReactiveConnection`]; see
//! `repose-store` for the SQLite implementation.

pub mod config;
pub mod connection;
pub mod engine;
pub mod errors;
pub mod event;
pub mod id;
pub mod loader;
pub mod logging_facility;
pub mod metamodel;
pub mod model;
pub mod session;
pub mod sql;

// Logging macros refer to `$crate::core_types`
pub use repose_core_types as core_types;

// Re-export commonly used types
pub use config::Settings;
pub use connection::{ReactiveConnection, Rows};
pub use engine::{ActionKind, EntityKey, LockMode, PersistenceContext, Status};
pub use errors::{ExError, ExErrorKind, ReposeError, Result};
pub use id::GeneratedId;
pub use metamodel::MappingRegistry;
pub use model::{
    AttributeMapping, CascadeStyle, EntityDescriptor, EntityRef, IdStrategy, IdType, Identifier,
    ProxyRef, SqlValue, TypeHandler, Value, VersionType,
};
pub use session::{CallbackRegistry, EmptyInterceptor, Interceptor, Session, SessionFactory};
