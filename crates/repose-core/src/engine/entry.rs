//! Per-instance bookkeeping records

use crate::engine::key::EntityKey;
use crate::model::descriptor::EntityDescriptor;
use crate::model::value::{Identifier, Value};
use std::fmt;
use std::sync::Arc;

/// Lifecycle status of a managed instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Admitted by the save pipeline; its insert has not executed yet
    Saving,
    Managed,
    /// Removal scheduled, delete not yet flushed
    Deleted,
    /// Delete flushed
    Gone,
    Loading,
    ReadOnly,
}

impl Status {
    pub fn is_deleted_or_gone(self) -> bool {
        matches!(self, Status::Deleted | Status::Gone)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Saving => "SAVING",
            Status::Managed => "MANAGED",
            Status::Deleted => "DELETED",
            Status::Gone => "GONE",
            Status::Loading => "LOADING",
            Status::ReadOnly => "READ_ONLY",
        };
        f.write_str(name)
    }
}

/// Lock modes, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    None,
    Read,
    Optimistic,
    OptimisticForceIncrement,
    Write,
    PessimisticWrite,
}

impl LockMode {
    /// Modes that require the stored version to be checked
    pub fn verifies_version(self) -> bool {
        !matches!(self, LockMode::None | LockMode::Write)
    }
}

/// Identity of one entry object. A replaced entry gets a new serial even
/// when it belongs to the same instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntrySerial(pub(crate) u64);

/// Initial contents of an entry
#[derive(Debug, Clone)]
pub struct EntryInit {
    pub status: Status,
    pub loaded_state: Option<Vec<Value>>,
    pub row_id: Option<i64>,
    pub id: Option<Identifier>,
    pub version: Option<Value>,
    pub lock_mode: LockMode,
    pub identity_column: bool,
    pub descriptor: Arc<EntityDescriptor>,
    pub disable_version_increment: bool,
}

impl EntryInit {
    /// Placeholder published by the save pipeline before cascading
    pub fn saving(
        descriptor: Arc<EntityDescriptor>,
        id: Option<Identifier>,
        identity_column: bool,
    ) -> Self {
        Self {
            status: Status::Saving,
            loaded_state: None,
            row_id: None,
            id,
            version: None,
            lock_mode: LockMode::Write,
            identity_column,
            descriptor,
            disable_version_increment: false,
        }
    }

    /// Entry for an instance whose identity insert just ran
    pub fn inserted(
        descriptor: Arc<EntityDescriptor>,
        id: Identifier,
        state: Vec<Value>,
        version: Option<Value>,
        row_id: Option<i64>,
    ) -> Self {
        Self {
            status: Status::Managed,
            loaded_state: Some(state),
            row_id,
            id: Some(id),
            version,
            lock_mode: LockMode::Write,
            identity_column: true,
            descriptor,
            disable_version_increment: false,
        }
    }

    /// Entry for an instance read from the database
    pub fn loaded(
        descriptor: Arc<EntityDescriptor>,
        id: Identifier,
        loaded_state: Vec<Value>,
        lock_mode: LockMode,
    ) -> Self {
        let version = descriptor
            .version_property()
            .and_then(|i| loaded_state.get(i).cloned());
        Self {
            status: Status::Managed,
            loaded_state: Some(loaded_state),
            row_id: None,
            id: Some(id),
            version,
            lock_mode,
            identity_column: false,
            descriptor,
            disable_version_increment: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityEntry {
    serial: EntrySerial,
    status: Status,
    previous_status: Option<Status>,
    loaded_state: Option<Vec<Value>>,
    row_id: Option<i64>,
    id: Option<Identifier>,
    version: Option<Value>,
    lock_mode: LockMode,
    identity_column: bool,
    descriptor: Arc<EntityDescriptor>,
    disable_version_increment: bool,
    exists_in_database: bool,
}

impl EntityEntry {
    pub(crate) fn new(serial: EntrySerial, init: EntryInit) -> Self {
        let exists_in_database = init.loaded_state.is_some();
        Self {
            serial,
            status: init.status,
            previous_status: None,
            loaded_state: init.loaded_state,
            row_id: init.row_id,
            id: init.id,
            version: init.version,
            lock_mode: init.lock_mode,
            identity_column: init.identity_column,
            descriptor: init.descriptor,
            disable_version_increment: init.disable_version_increment,
            exists_in_database,
        }
    }

    pub fn serial(&self) -> EntrySerial {
        self.serial
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn previous_status(&self) -> Option<Status> {
        self.previous_status
    }

    pub fn loaded_state(&self) -> Option<&[Value]> {
        self.loaded_state.as_deref()
    }

    pub fn row_id(&self) -> Option<i64> {
        self.row_id
    }

    pub fn id(&self) -> Option<&Identifier> {
        self.id.as_ref()
    }

    pub fn version(&self) -> Option<&Value> {
        self.version.as_ref()
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    pub fn is_identity_column(&self) -> bool {
        self.identity_column
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn is_version_increment_disabled(&self) -> bool {
        self.disable_version_increment
    }

    pub fn exists_in_database(&self) -> bool {
        self.exists_in_database
    }

    pub fn entity_key(&self) -> Option<EntityKey> {
        self.id
            .clone()
            .map(|id| EntityKey::for_descriptor(&self.descriptor, id))
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        if self.status != status {
            self.previous_status = Some(self.status);
            self.status = status;
        }
    }

    pub(crate) fn set_id(&mut self, id: Identifier) {
        self.id = Some(id);
    }

    pub(crate) fn set_lock_mode(&mut self, lock_mode: LockMode) {
        self.lock_mode = lock_mode;
    }

    /// Record the state the database now holds for this instance
    pub(crate) fn post_write(&mut self, state: Vec<Value>, version: Option<Value>) {
        self.loaded_state = Some(state);
        self.version = version;
        self.exists_in_database = true;
    }

    pub(crate) fn post_insert(&mut self, state: Vec<Value>, version: Option<Value>) {
        if self.status == Status::Saving {
            self.set_status(Status::Managed);
        }
        self.post_write(state, version);
    }
}
