use crate::engine::cascade::{cascade, CascadeContext, CascadePoint, CascadingAction};
use crate::errors::{ReposeError, Result};
use crate::model::entity::EntityRef;
use crate::session::Session;

/// Re-read the row of a managed instance and overwrite its state
///
/// Associations mapped with `refresh` are refreshed first. The cached
/// snapshot is bypassed and replaced.
pub async fn on_refresh(session: &mut Session, entity: &EntityRef, ctx: &mut CascadeContext) -> Result<()> {
    if !ctx.visit(entity) {
        return Ok(());
    }

    let (descriptor, id, lock_mode) = {
        let entry = session
            .persistence_context()
            .get_entry(entity)
            .ok_or_else(|| ReposeError::NotManaged {
                entity_name: entity.entity_name().to_string(),
            })?;
        if entry.status().is_deleted_or_gone() {
            return Err(ReposeError::ObjectDeleted {
                entity_name: entity.entity_name().to_string(),
                id: entity.id().map(|id| id.to_string()).unwrap_or_default(),
                operation: "refresh".to_string(),
            });
        }
        let id = entry.id().cloned().ok_or_else(|| ReposeError::TransientReference {
            entity_name: entity.entity_name().to_string(),
            attribute: "<identifier>".to_string(),
        })?;
        (entry.descriptor().clone(), id, entry.lock_mode())
    };

    cascade(
        session,
        CascadingAction::Refresh,
        CascadePoint::BeforeRefresh,
        &descriptor,
        entity,
        ctx,
    )
    .await?;

    let key = session.generate_entity_key(id.clone(), &descriptor);
    session.persistence_context_mut().evict_snapshot(&key);
    let state = session
        .get_database_snapshot(descriptor.entity_name(), &id)
        .await?
        .ok_or_else(|| ReposeError::ObjectNotFound {
            entity_name: descriptor.entity_name().to_string(),
            id: id.to_string(),
        })?;

    tracing::trace!(entity_name = descriptor.entity_name(), entity_id = %id, "refreshed");
    session.load_into(&descriptor, entity, &id, state, lock_mode)
}
