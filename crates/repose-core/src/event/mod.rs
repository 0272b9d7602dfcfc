//! Event listeners: the pipelines behind the session operations
//!
//! `save` is the orchestrator shared by persist and merge. The other
//! listeners reuse the cascade walker and the action queue.

pub mod delete;
pub mod flush;
pub mod lock;
pub mod merge;
pub mod persist;
pub mod refresh;
pub mod save;
pub mod wrap_visitor;

/// How a listener sees an instance it was handed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Has an entry in the persistence context
    Persistent,
    /// Never saved, or its row no longer exists
    Transient,
    /// Has an identity but is not associated with this session
    Detached,
    /// Managed and scheduled for removal
    Deleted,
}
