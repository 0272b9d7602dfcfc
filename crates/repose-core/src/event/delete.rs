//! Remove listener
//!
//! Collections are walked before the parent's delete is queued, to-one
//! referents after it, mirroring the insert order in reverse.

use crate::engine::cascade::{cascade, CascadeContext, CascadePoint, CascadingAction};
use crate::engine::{EntityAction, Status};
use crate::errors::{ReposeError, Result};
use crate::model::entity::EntityRef;
use crate::session::Session;

pub async fn on_delete(
    session: &mut Session,
    entity: &EntityRef,
    entity_name: Option<&str>,
    ctx: &mut CascadeContext,
) -> Result<()> {
    let Some(status) = session
        .persistence_context()
        .get_entry(entity)
        .map(|entry| entry.status())
    else {
        if entity.id().is_none() {
            // Transient: nothing to remove
            return Ok(());
        }
        let descriptor = session.entity_persister(entity_name, entity)?;
        return Err(ReposeError::NotManaged {
            entity_name: descriptor.entity_name().to_string(),
        });
    };

    if status.is_deleted_or_gone() || !ctx.visit(entity) {
        return Ok(());
    }
    if status == Status::Saving {
        // The insert has to run first so the delete sees the stored
        // identifier and version
        session.execute_pending().await?;
    }

    let (descriptor, id, version) = {
        let entry = session
            .persistence_context()
            .get_entry(entity)
            .ok_or_else(|| ReposeError::NotManaged {
                entity_name: entity.entity_name().to_string(),
            })?;
        let id = entry.id().cloned().ok_or_else(|| {
            ReposeError::assertion(format!("managed {} has no identifier", entity.entity_name()))
        })?;
        (entry.descriptor().clone(), id, entry.version().cloned())
    };

    let state = descriptor.get_property_values(entity);
    session.interceptor().on_delete(
        entity,
        &id,
        &state,
        &descriptor.property_names(),
        &descriptor.property_types(),
    )?;

    cascade(
        session,
        CascadingAction::Delete,
        CascadePoint::AfterInsertBeforeDelete,
        &descriptor,
        entity,
        ctx,
    )
    .await?;

    session.set_status(entity, Status::Deleted)?;
    tracing::trace!(
        entity_name = descriptor.entity_name(),
        entity_id = %id,
        "delete scheduled"
    );
    session
        .enqueue(EntityAction::delete(descriptor.clone(), entity.clone(), id, version))
        .await?;

    cascade(
        session,
        CascadingAction::Delete,
        CascadePoint::BeforeInsertAfterDelete,
        &descriptor,
        entity,
        ctx,
    )
    .await
}
