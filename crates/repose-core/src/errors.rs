use repose_core_types::{RequestId, TraceId};
use thiserror::Error;

/// Result type alias using ReposeError
pub type Result<T> = std::result::Result<T, ReposeError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code that callers, tests and the CLI
/// can match on without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Identity / lifecycle
    NonUniqueObject,
    NullIdentifier,
    NotFound,
    Deleted,
    Detached,
    NotManaged,
    TransientReference,
    StaleState,

    // Values and mapping
    TypeMismatch,
    InvalidMapping,
    InvalidInput,
    Vetoed,

    // Pipeline integrity
    AssertionFailure,
    ProtocolViolation,
    IdGeneration,

    // Session and transaction state
    RollbackOnly,
    InvalidState,

    // Integration/IO
    Persistence,
    Io,
    Serialization,
    Configuration,
    ConstraintViolation,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::NonUniqueObject => "ERR_NON_UNIQUE_OBJECT",
            ExErrorKind::NullIdentifier => "ERR_NULL_IDENTIFIER",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::Deleted => "ERR_DELETED",
            ExErrorKind::Detached => "ERR_DETACHED",
            ExErrorKind::NotManaged => "ERR_NOT_MANAGED",
            ExErrorKind::TransientReference => "ERR_TRANSIENT_REFERENCE",
            ExErrorKind::StaleState => "ERR_STALE_STATE",
            ExErrorKind::TypeMismatch => "ERR_TYPE_MISMATCH",
            ExErrorKind::InvalidMapping => "ERR_INVALID_MAPPING",
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::Vetoed => "ERR_VETOED",
            ExErrorKind::AssertionFailure => "ERR_ASSERTION_FAILURE",
            ExErrorKind::ProtocolViolation => "ERR_PROTOCOL_VIOLATION",
            ExErrorKind::IdGeneration => "ERR_ID_GENERATION",
            ExErrorKind::RollbackOnly => "ERR_ROLLBACK_ONLY",
            ExErrorKind::InvalidState => "ERR_INVALID_STATE",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Configuration => "ERR_CONFIGURATION",
            ExErrorKind::ConstraintViolation => "ERR_CONSTRAINT_VIOLATION",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Carries a classification for programmatic handling plus the context
/// (operation, entity, correlation ids) needed to debug a failure.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    entity_name: Option<String>,
    entity_id: Option<String>,
    request_id: Option<RequestId>,
    trace_id: Option<TraceId>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            entity_name: None,
            entity_id: None,
            request_id: None,
            trace_id: None,
            message: String::new(),
            source: None,
        }
    }

    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    pub fn with_entity_name(mut self, name: impl Into<String>) -> Self {
        self.entity_name = Some(name.into());
        self
    }

    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn entity_name(&self) -> Option<&str> {
        self.entity_name.as_deref()
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        match (&self.entity_name, &self.entity_id) {
            (Some(name), Some(id)) => write!(f, " ({}#{})", name, id)?,
            (Some(name), None) => write!(f, " ({})", name)?,
            (None, Some(id)) => write!(f, " (entity_id: {})", id)?,
            (None, None) => {}
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Error taxonomy of the persistence pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReposeError {
    // ===== Identity and lifecycle =====
    /// Another managed instance already holds the key
    #[error("A different object with the same identifier is already associated with the session: {entity_name}#{id}")]
    NonUniqueObject { entity_name: String, id: String },

    /// A non-generated identifier was missing at save time
    #[error("Identifier of {entity_name} must be assigned before saving")]
    NullIdentifier { entity_name: String },

    #[error("Detached entity passed to persist: {entity_name}#{id}")]
    DetachedEntity { entity_name: String, id: String },

    #[error("Deleted instance passed to {operation}: {entity_name}#{id}")]
    ObjectDeleted {
        entity_name: String,
        id: String,
        operation: String,
    },

    #[error("No row with the given identifier exists: {entity_name}#{id}")]
    ObjectNotFound { entity_name: String, id: String },

    #[error("Instance of {entity_name} is not associated with this session")]
    NotManaged { entity_name: String },

    /// An association points at an instance that has no identifier yet
    #[error("{attribute} references an unsaved transient instance of {entity_name}")]
    TransientReference {
        entity_name: String,
        attribute: String,
    },

    /// An optimistic update or delete matched no row
    #[error("Row was updated or deleted by another transaction: {entity_name}#{id}")]
    StaleObjectState { entity_name: String, id: String },

    // ===== Values and mapping =====
    #[error("Type mismatch on {attribute}: expected {expected}, found {found}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        found: String,
    },

    #[error("Interceptor vetoed {operation} of {entity_name}: {reason}")]
    InterceptorVeto {
        entity_name: String,
        operation: String,
        reason: String,
    },

    #[error("Unknown entity: {entity_name}")]
    UnknownEntity { entity_name: String },

    #[error("Instance of {actual} cannot be handled as {expected}")]
    WrongEntityType { expected: String, actual: String },

    #[error("Invalid mapping for {entity_name}: {message}")]
    InvalidMapping {
        entity_name: String,
        message: String,
    },

    // ===== Pipeline integrity =====
    #[error("Assertion failure: {message}")]
    AssertionFailure { message: String },

    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    #[error("Identifier generation failed for {entity_name}: {message}")]
    IdentifierGeneration {
        entity_name: String,
        message: String,
    },

    // ===== Session and transaction state =====
    #[error("Transaction is marked rollback-only")]
    RollbackOnly,

    #[error("No transaction is in progress")]
    NoTransaction,

    #[error("A transaction is already in progress")]
    TransactionAlreadyActive,

    #[error("Session is closed")]
    SessionClosed,

    // ===== Integration =====
    /// Driver-level failure (constraint, IO); marks the session rollback-only
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ReposeError {
    pub fn database(message: impl Into<String>) -> Self {
        ReposeError::Database {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        ReposeError::ProtocolViolation {
            message: message.into(),
        }
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        ReposeError::AssertionFailure {
            message: message.into(),
        }
    }

    /// Errors that poison the surrounding transaction
    pub fn is_database(&self) -> bool {
        matches!(
            self,
            ReposeError::Database { .. } | ReposeError::StaleObjectState { .. }
        )
    }
}

/// Convert ReposeError to ExError
impl From<ReposeError> for ExError {
    fn from(err: ReposeError) -> Self {
        let message = err.to_string();
        match err {
            ReposeError::NonUniqueObject { entity_name, id } => {
                ExError::new(ExErrorKind::NonUniqueObject)
                    .with_entity_name(entity_name)
                    .with_entity_id(id)
                    .with_message(message)
            }
            ReposeError::NullIdentifier { entity_name } => {
                ExError::new(ExErrorKind::NullIdentifier)
                    .with_entity_name(entity_name)
                    .with_message(message)
            }
            ReposeError::DetachedEntity { entity_name, id } => {
                ExError::new(ExErrorKind::Detached)
                    .with_op("persist")
                    .with_entity_name(entity_name)
                    .with_entity_id(id)
                    .with_message(message)
            }
            ReposeError::ObjectDeleted {
                entity_name,
                id,
                operation,
            } => ExError::new(ExErrorKind::Deleted)
                .with_op(operation)
                .with_entity_name(entity_name)
                .with_entity_id(id)
                .with_message(message),
            ReposeError::ObjectNotFound { entity_name, id } => {
                ExError::new(ExErrorKind::NotFound)
                    .with_entity_name(entity_name)
                    .with_entity_id(id)
                    .with_message(message)
            }
            ReposeError::NotManaged { entity_name } => ExError::new(ExErrorKind::NotManaged)
                .with_entity_name(entity_name)
                .with_message(message),
            ReposeError::TransientReference { entity_name, .. } => {
                ExError::new(ExErrorKind::TransientReference)
                    .with_entity_name(entity_name)
                    .with_message(message)
            }
            ReposeError::StaleObjectState { entity_name, id } => {
                ExError::new(ExErrorKind::StaleState)
                    .with_op("flush")
                    .with_entity_name(entity_name)
                    .with_entity_id(id)
                    .with_message(message)
            }
            ReposeError::TypeMismatch { .. } => {
                ExError::new(ExErrorKind::TypeMismatch).with_message(message)
            }
            ReposeError::InterceptorVeto {
                entity_name,
                operation,
                ..
            } => ExError::new(ExErrorKind::Vetoed)
                .with_op(operation)
                .with_entity_name(entity_name)
                .with_message(message),
            ReposeError::UnknownEntity { entity_name } => {
                ExError::new(ExErrorKind::InvalidMapping)
                    .with_entity_name(entity_name)
                    .with_message(message)
            }
            ReposeError::WrongEntityType { expected, .. } => {
                ExError::new(ExErrorKind::InvalidInput)
                    .with_entity_name(expected)
                    .with_message(message)
            }
            ReposeError::InvalidMapping { entity_name, .. } => {
                ExError::new(ExErrorKind::InvalidMapping)
                    .with_entity_name(entity_name)
                    .with_message(message)
            }
            ReposeError::AssertionFailure { .. } => {
                ExError::new(ExErrorKind::AssertionFailure).with_message(message)
            }
            ReposeError::ProtocolViolation { .. } => {
                ExError::new(ExErrorKind::ProtocolViolation).with_message(message)
            }
            ReposeError::IdentifierGeneration { entity_name, .. } => {
                ExError::new(ExErrorKind::IdGeneration)
                    .with_op("generate_id")
                    .with_entity_name(entity_name)
                    .with_message(message)
            }
            ReposeError::RollbackOnly => ExError::new(ExErrorKind::RollbackOnly)
                .with_op("commit")
                .with_message(message),
            ReposeError::NoTransaction
            | ReposeError::TransactionAlreadyActive
            | ReposeError::SessionClosed => {
                ExError::new(ExErrorKind::InvalidState).with_message(message)
            }
            ReposeError::Database { .. } => ExError::new(ExErrorKind::Persistence)
                .with_op("execute")
                .with_message(message),
            ReposeError::Configuration { .. } => {
                ExError::new(ExErrorKind::Configuration).with_message(message)
            }
            ReposeError::Internal { .. } => {
                ExError::new(ExErrorKind::Internal).with_message(message)
            }
        }
    }
}
