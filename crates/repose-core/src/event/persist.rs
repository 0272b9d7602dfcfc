//! Persist listener
//!
//! Classifies the instance and either saves it, cascades through it, or
//! revives it from a scheduled removal.

use crate::engine::cascade::{cascade, CascadeContext, CascadePoint, CascadingAction};
use crate::engine::Status;
use crate::errors::{ReposeError, Result};
use crate::event::{save, EntityState};
use crate::model::descriptor::{EntityDescriptor, IdStrategy};
use crate::model::entity::EntityRef;
use crate::model::value::{Identifier, Value};
use crate::session::Session;
use std::sync::Arc;

pub async fn on_persist(
    session: &mut Session,
    entity: &EntityRef,
    entity_name: Option<&str>,
    ctx: &mut CascadeContext,
) -> Result<()> {
    let descriptor = session.entity_persister(entity_name, entity)?;
    let state = entity_state(session, entity, &descriptor).await?;
    tracing::trace!(
        entity_name = descriptor.entity_name(),
        state = ?state,
        "persist"
    );

    match state {
        EntityState::Persistent => {
            if ctx.visit(entity) {
                just_cascade(session, entity, ctx).await?;
            }
            Ok(())
        }
        EntityState::Deleted => {
            session.set_status(entity, Status::Managed)?;
            session.action_queue_mut().unschedule_deletion(entity);
            if ctx.visit(entity) {
                just_cascade(session, entity, ctx).await?;
            }
            Ok(())
        }
        EntityState::Transient => {
            if !ctx.visit(entity) {
                return Err(ReposeError::assertion(format!(
                    "cascade reached unsaved {} {} twice without a saving placeholder",
                    entity.entity_name(),
                    entity.instance_id()
                )));
            }
            save::save_with_generated_id(session, entity, entity_name, ctx, false).await
        }
        EntityState::Detached => Err(ReposeError::DetachedEntity {
            entity_name: descriptor.entity_name().to_string(),
            id: entity.id().map(|id| id.to_string()).unwrap_or_default(),
        }),
    }
}

/// Cascade through an instance that is already managed
async fn just_cascade(session: &mut Session, entity: &EntityRef, ctx: &mut CascadeContext) -> Result<()> {
    let Some(descriptor) = session
        .persistence_context()
        .get_entry(entity)
        .map(|entry| entry.descriptor().clone())
    else {
        return Ok(());
    };
    for point in [
        CascadePoint::BeforeInsertAfterDelete,
        CascadePoint::AfterInsertBeforeDelete,
    ] {
        cascade(session, CascadingAction::Persist, point, &descriptor, entity, ctx).await?;
    }
    Ok(())
}

/// Classify `entity` for persist and merge
///
/// An entry decides directly. Without one: no identifier or an unset
/// version means transient; generated identifiers mean detached; assigned
/// identifiers are looked up in the database, unless their key is held by
/// a removed instance.
pub async fn entity_state(
    session: &mut Session,
    entity: &EntityRef,
    descriptor: &Arc<EntityDescriptor>,
) -> Result<EntityState> {
    if let Some(entry) = session.persistence_context().get_entry(entity) {
        return Ok(match entry.status() {
            Status::Deleted | Status::Gone => EntityState::Deleted,
            _ => EntityState::Persistent,
        });
    }

    let Some(id) = descriptor.get_identifier(entity) else {
        return Ok(EntityState::Transient);
    };

    if let Some(index) = descriptor.version_property() {
        let version = entity.get(&descriptor.attributes()[index].name);
        return Ok(match version {
            Value::Null => EntityState::Transient,
            Value::Integer(v) if v < 0 => EntityState::Transient,
            _ => EntityState::Detached,
        });
    }

    match descriptor.id_strategy() {
        IdStrategy::Assigned => {
            let id = descriptor.id_type().coerce(&id)?;
            if holds_removed_instance(session, descriptor, &id) {
                // The row is still there until the delete runs; the save
                // pipeline flushes it before admitting this instance
                return Ok(EntityState::Transient);
            }
            let snapshot = session
                .get_database_snapshot(descriptor.entity_name(), &id)
                .await?;
            Ok(if snapshot.is_some() {
                EntityState::Detached
            } else {
                EntityState::Transient
            })
        }
        _ => Ok(EntityState::Detached),
    }
}

fn holds_removed_instance(session: &Session, descriptor: &EntityDescriptor, id: &Identifier) -> bool {
    let key = session.generate_entity_key(id.clone(), descriptor);
    let pc = session.persistence_context();
    pc.get_entity(&key)
        .and_then(|holder| pc.get_entry(&holder).map(|entry| entry.status()))
        .is_some_and(|status| matches!(status, Status::Deleted | Status::Gone))
}
