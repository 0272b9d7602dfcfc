//! Identifier generation
//!
//! Every strategy except identity yields the id before the insert is
//! queued. Identity yields [`GeneratedId::Deferred`]: the id is produced by
//! the insert itself.

mod table;

use crate::errors::{ReposeError, Result};
use crate::model::descriptor::{EntityDescriptor, IdStrategy};
use crate::model::entity::EntityRef;
use crate::model::value::Identifier;
use crate::session::Session;
use uuid::Uuid;

pub use table::{ID_TABLE, ID_TABLE_NEXT_VALUE, ID_TABLE_SEGMENT};

/// Outcome of identifier generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedId {
    Assigned(Identifier),
    /// Produced by the database on insert
    Deferred,
}

impl GeneratedId {
    pub fn is_deferred(&self) -> bool {
        matches!(self, GeneratedId::Deferred)
    }

    pub fn assigned(&self) -> Option<&Identifier> {
        match self {
            GeneratedId::Assigned(id) => Some(id),
            GeneratedId::Deferred => None,
        }
    }
}

/// Produce the identifier for `entity` according to the descriptor's strategy
///
/// # Errors
///
/// [`ReposeError::NullIdentifier`] when an assigned id is missing; driver
/// errors from sequence and table round trips;
/// [`ReposeError::IdentifierGeneration`] when the table generator keeps
/// losing its optimistic update.
pub async fn generate(
    entity: &EntityRef,
    descriptor: &EntityDescriptor,
    session: &Session,
) -> Result<GeneratedId> {
    let id = match descriptor.id_strategy() {
        IdStrategy::Assigned => match descriptor.get_identifier(entity) {
            Some(id) => id,
            None => {
                return Err(ReposeError::NullIdentifier {
                    entity_name: descriptor.entity_name().to_string(),
                })
            }
        },
        IdStrategy::Identity => return Ok(GeneratedId::Deferred),
        IdStrategy::Sequence { name } => {
            let value = session.connection().next_sequence_value(name).await?;
            Identifier::Long(value)
        }
        IdStrategy::Table { segment } => {
            let retries = session.factory().settings().table_generator_max_retries;
            table::next_value(session.connection(), descriptor.entity_name(), segment, retries).await?
        }
        IdStrategy::Uuid => Identifier::Uuid(Uuid::new_v4()),
    };

    let id = descriptor.id_type().coerce(&id)?;
    tracing::trace!(
        entity_name = descriptor.entity_name(),
        entity_id = %id,
        "generated identifier"
    );
    Ok(GeneratedId::Assigned(id))
}

/// Write `id` onto `entity` unless it already has one; return the id the
/// entity ends up with
pub fn assign_id_if_necessary(
    id: &Identifier,
    entity: &EntityRef,
    descriptor: &EntityDescriptor,
) -> Result<Identifier> {
    match descriptor.get_identifier(entity) {
        Some(existing) => descriptor.id_type().coerce(&existing),
        None => {
            let id = descriptor.id_type().coerce(id)?;
            descriptor.set_identifier(entity, Some(id.clone()));
            Ok(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::value::IdType;

    fn descriptor(id_type: IdType) -> EntityDescriptor {
        EntityDescriptor::builder("Book", "books")
            .id("id", "id", id_type, IdStrategy::Assigned)
            .build()
            .unwrap()
    }

    #[test]
    fn test_assign_sets_missing_id() {
        let d = descriptor(IdType::Long);
        let e = EntityRef::new("Book");
        let id = assign_id_if_necessary(&Identifier::Long(5), &e, &d).unwrap();
        assert_eq!(id, Identifier::Long(5));
        assert_eq!(e.id(), Some(Identifier::Long(5)));
    }

    #[test]
    fn test_assign_keeps_existing_id() {
        let d = descriptor(IdType::Long);
        let e = EntityRef::new("Book").with_id(1);
        let id = assign_id_if_necessary(&Identifier::Long(5), &e, &d).unwrap();
        assert_eq!(id, Identifier::Long(1));
        assert_eq!(e.id(), Some(Identifier::Long(1)));
    }

    #[test]
    fn test_assign_coerces_to_declared_type() {
        let d = descriptor(IdType::Text);
        let e = EntityRef::new("Book");
        let id = assign_id_if_necessary(&Identifier::Long(5), &e, &d).unwrap();
        assert_eq!(id, Identifier::Text("5".to_string()));
    }

    #[test]
    fn test_generated_id_accessors() {
        assert!(GeneratedId::Deferred.is_deferred());
        assert_eq!(
            GeneratedId::Assigned(Identifier::Long(1)).assigned(),
            Some(&Identifier::Long(1))
        );
    }
}
