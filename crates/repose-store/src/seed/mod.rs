//! YAML graph seeds
//!
//! A seed document declares entity mappings plus an object graph; import
//! creates the mapped tables and persists the graph through a session in a
//! single transaction.

pub mod format;
mod importer;
mod parser;

pub use format::{SeedDocument, SEED_SCHEMA_VERSION};
pub use importer::{import_document, import_seed, ImportReport, ImportedObject};
pub use parser::{build_registry, parse_seed_file, parse_seed_str};

use crate::errors::Result;
use crate::migrations::compute_checksum;
use repose_core::errors::{ExError, ExErrorKind};

/// Hex SHA-256 over the document's canonical JSON form, so formatting and
/// comments in the YAML do not change it
pub fn compute_seed_digest(document: &SeedDocument) -> Result<String> {
    let canonical = serde_json::to_string(document).map_err(|e| {
        ExError::new(ExErrorKind::Serialization)
            .with_op("seed_digest")
            .with_message(e.to_string())
    })?;
    Ok(compute_checksum(&canonical))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = r#"
schema_version: 1
entities:
  - name: Tag
    table: tags
    id: { type: text }
objects:
  - { entity: Tag, id: rust }
"#;

    #[test]
    fn test_digest_ignores_formatting() {
        let compact = parse_seed_str(SEED).unwrap();
        let commented = parse_seed_str(&format!("# tags only\n{}\n\n", SEED)).unwrap();

        assert_eq!(
            compute_seed_digest(&compact).unwrap(),
            compute_seed_digest(&commented).unwrap()
        );
    }

    #[test]
    fn test_digest_tracks_content() {
        let a = parse_seed_str(SEED).unwrap();
        let b = parse_seed_str(&SEED.replace("id: rust", "id: go")).unwrap();

        assert_ne!(compute_seed_digest(&a).unwrap(), compute_seed_digest(&b).unwrap());
    }
}
