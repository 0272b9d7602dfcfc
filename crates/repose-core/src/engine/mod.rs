//! Session-internal machinery: persistence context, action queue, cascades

pub mod action_queue;
pub mod cascade;
pub mod entry;
pub mod extra_state;
pub mod key;
pub mod persistence_context;
pub mod versioning;

pub use action_queue::{ActionKind, ActionQueue, EntityAction, ExecutionContext, QueueStatistics};
pub use cascade::{CascadeContext, CascadePoint, CascadingAction};
pub use entry::{EntityEntry, EntryInit, EntrySerial, LockMode, Status};
pub use key::EntityKey;
pub use persistence_context::PersistenceContext;
