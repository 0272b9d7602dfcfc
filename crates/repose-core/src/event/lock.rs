use crate::engine::cascade::{cascade, CascadeContext, CascadePoint, CascadingAction};
use crate::engine::LockMode;
use crate::errors::{ReposeError, Result};
use crate::model::entity::EntityRef;
use crate::session::Session;

/// Record the context's lock mode on a managed instance
///
/// Version-verifying modes compare the entry's version with the stored
/// one and fail with [`ReposeError::StaleObjectState`] on a difference or a
/// missing row. `OptimisticForceIncrement` makes the next flush increment
/// the version even if nothing else changed.
pub async fn on_lock(session: &mut Session, entity: &EntityRef, ctx: &mut CascadeContext) -> Result<()> {
    if !ctx.visit(entity) {
        return Ok(());
    }
    let lock_mode = ctx.lock_mode();

    let (descriptor, id, version, current_mode) = {
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
                operation: "lock".to_string(),
            });
        }
        (
            entry.descriptor().clone(),
            entry.id().cloned(),
            entry.version().cloned(),
            entry.lock_mode(),
        )
    };

    if lock_mode.verifies_version() && descriptor.is_versioned() {
        let stale = || ReposeError::StaleObjectState {
            entity_name: descriptor.entity_name().to_string(),
            id: id.as_ref().map(|id| id.to_string()).unwrap_or_default(),
        };
        let id = id.clone().ok_or_else(stale)?;
        let persister = session.factory().clone();
        let snapshot = persister
            .persister(descriptor.entity_name())?
            .snapshot_loader()
            .load_snapshot(&id, session.connection())
            .await?
            .ok_or_else(stale)?;

        let index = descriptor.version_property().unwrap_or_default();
        let handler = &descriptor.attributes()[index].handler;
        let current = match (version.as_ref(), snapshot.get(index)) {
            (Some(held), Some(stored)) => handler.is_same(held, stored),
            _ => false,
        };
        if !current {
            return Err(stale());
        }
    }

    if lock_mode > current_mode || lock_mode == LockMode::OptimisticForceIncrement {
        if let Some(entry) = session.persistence_context_mut().get_entry_mut(entity) {
            entry.set_lock_mode(lock_mode);
        }
    }
    tracing::trace!(entity_name = descriptor.entity_name(), lock_mode = ?lock_mode, "locked");

    cascade(
        session,
        CascadingAction::Lock,
        CascadePoint::AfterLock,
        &descriptor,
        entity,
        ctx,
    )
    .await
}
