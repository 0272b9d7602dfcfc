//! Error handling for repose-store
//!
//! Store-level APIs return the canonical [`ExError`]; the driver side of
//! the connection contract returns [`ReposeError`] like the rest of the
//! pipeline.

use repose_core::errors::{ExError, ExErrorKind, ReposeError};

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

pub fn migration_error(migration_id: &str, reason: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("migration")
        .with_message(format!("Migration {} failed: {}", migration_id, reason))
}

/// A recorded migration whose DDL no longer matches what would be applied
pub fn checksum_mismatch(migration_id: &str, expected: &str, actual: &str) -> ExError {
    ExError::new(ExErrorKind::ConstraintViolation)
        .with_op("migration_checksum")
        .with_message(format!(
            "Checksum mismatch for migration {}: expected {}, got {}",
            migration_id, expected, actual
        ))
}

pub fn seed_validation(reason: &str) -> ExError {
    ExError::new(ExErrorKind::InvalidInput)
        .with_op("seed_parse")
        .with_message(reason.to_string())
}

pub fn from_rusqlite(err: rusqlite::Error) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("sqlite")
        .with_message(err.to_string())
}

pub fn io_error(operation: &str, err: std::io::Error) -> ExError {
    ExError::new(ExErrorKind::Io)
        .with_op(operation.to_string())
        .with_message(err.to_string())
}

/// Driver failures surface to the session as [`ReposeError::Database`],
/// which marks the transaction rollback-only
pub(crate) fn database(err: rusqlite::Error) -> ReposeError {
    ReposeError::database(err.to_string())
}

/// Attach the store operation name to a pipeline error
pub(crate) fn pipeline(op: &str) -> impl FnOnce(ReposeError) -> ExError + '_ {
    move |err| ExError::from(err).with_op(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_errors_keep_their_code() {
        let err = pipeline("seed_import")(ReposeError::NullIdentifier {
            entity_name: "Book".to_string(),
        });
        assert_eq!(err.code(), "ERR_NULL_IDENTIFIER");
        assert_eq!(err.op(), Some("seed_import"));
    }

    #[test]
    fn test_sqlite_errors_are_persistence_errors() {
        let err = from_rusqlite(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.kind(), ExErrorKind::Persistence);
        assert_eq!(err.op(), Some("sqlite"));
    }
}
