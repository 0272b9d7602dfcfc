//! The save pipeline
//!
//! Turns a transient instance into a SAVING entry plus a queued insert.
//! The order of the stages is fixed:
//!
//! 1. pre-create callback (and clear of self-tracked dirty attributes)
//! 2. descriptor resolution
//! 3. identifier generation
//! 4. key check (a DELETED holder forces a flush, any other holder fails)
//! 5. SAVING placeholder published in the persistence context
//! 6. cascade to to-one associations
//! 7. value preparation: interceptor, version seed, collection wrapping,
//!    deep copy, then references to instances still waiting for their
//!    generated identifier are left null and written by the next flush
//! 8. insert action queued (identity inserts may execute right away)
//! 9. extra state carried over if the entry was replaced meanwhile
//! 10. cascade to collections
//!
//! Stage 5 is one synchronous call: there is no await point between the
//! key check and the placeholder, so a dropped future either never
//! published the entry or published a complete one.

use crate::engine::cascade::{cascade, CascadeContext, CascadePoint};
use crate::engine::{versioning, EntityAction, EntryInit, Status};
use crate::errors::{ReposeError, Result};
use crate::event::wrap_visitor;
use crate::id::{self, GeneratedId};
use crate::model::descriptor::EntityDescriptor;
use crate::model::entity::EntityRef;
use crate::model::types::deep_copy;
use crate::model::value::{Identifier, Value};
use crate::session::Session;
use std::sync::Arc;

/// Save `entity` under an identifier chosen by the caller
pub async fn save_with_requested_id(
    session: &mut Session,
    entity: &EntityRef,
    id: Identifier,
    entity_name: Option<&str>,
    ctx: &mut CascadeContext,
) -> Result<()> {
    call_pre_create(session, entity)?;
    let descriptor = session.entity_persister(entity_name, entity)?;
    let id = descriptor.id_type().coerce(&id)?;
    perform_save(session, entity, Some(id), descriptor, false, ctx, true).await
}

/// Save `entity` under an identifier produced by its generator
///
/// `requires_immediate_id_access` forces identity inserts to execute
/// before this returns even outside a transaction.
pub async fn save_with_generated_id(
    session: &mut Session,
    entity: &EntityRef,
    entity_name: Option<&str>,
    ctx: &mut CascadeContext,
    requires_immediate_id_access: bool,
) -> Result<()> {
    call_pre_create(session, entity)?;
    let descriptor = session.entity_persister(entity_name, entity)?;
    let generated = id::generate(entity, &descriptor, session).await?;

    match generated {
        GeneratedId::Deferred => {
            perform_save(
                session,
                entity,
                None,
                descriptor,
                true,
                ctx,
                requires_immediate_id_access,
            )
            .await
        }
        GeneratedId::Assigned(generated) => {
            let id = id::assign_id_if_necessary(&generated, entity, &descriptor)?;
            perform_save(session, entity, Some(id), descriptor, false, ctx, true).await
        }
    }
}

fn call_pre_create(session: &Session, entity: &EntityRef) -> Result<()> {
    session.callbacks().pre_create(entity)?;
    if entity.is_dirtiness_tracked() {
        entity.clear_dirty_attributes();
    }
    Ok(())
}

/// Key check, then the placeholder and the rest of the pipeline
async fn perform_save(
    session: &mut Session,
    entity: &EntityRef,
    id: Option<Identifier>,
    descriptor: Arc<EntityDescriptor>,
    use_identity_column: bool,
    ctx: &mut CascadeContext,
    requires_immediate_id_access: bool,
) -> Result<()> {
    if !use_identity_column {
        let id = id.clone().ok_or_else(|| ReposeError::NullIdentifier {
            entity_name: descriptor.entity_name().to_string(),
        })?;
        let key = session.generate_entity_key(id.clone(), &descriptor);

        if let Some(holder) = session.persistence_context().get_entity(&key) {
            let status = session
                .persistence_context()
                .get_entry(&holder)
                .map(|entry| entry.status());
            if status == Some(Status::Deleted) {
                tracing::debug!(key = %key, "key held by a deleted instance, flushing first");
                session.execute_pending().await?;
            } else {
                return Err(ReposeError::NonUniqueObject {
                    entity_name: descriptor.entity_name().to_string(),
                    id: id.to_string(),
                });
            }
            // The forced flush may not have executed the delete (e.g. the
            // holder's insert is still pending); the key must be free now
            if session.persistence_context().get_entity(&key).is_some() {
                return Err(ReposeError::NonUniqueObject {
                    entity_name: descriptor.entity_name().to_string(),
                    id: id.to_string(),
                });
            }
        }
        descriptor.set_identifier(entity, Some(id));
    }

    perform_save_or_replicate(
        session,
        entity,
        id,
        descriptor,
        use_identity_column,
        ctx,
        requires_immediate_id_access,
    )
    .await
}

async fn perform_save_or_replicate(
    session: &mut Session,
    entity: &EntityRef,
    id: Option<Identifier>,
    descriptor: Arc<EntityDescriptor>,
    use_identity_column: bool,
    ctx: &mut CascadeContext,
    requires_immediate_id_access: bool,
) -> Result<()> {
    let should_delay_identity_inserts =
        !session.is_transaction_in_progress() && !requires_immediate_id_access;

    let original = session.persistence_context_mut().add_entry(
        entity,
        EntryInit::saving(descriptor.clone(), id.clone(), use_identity_column),
    )?;
    tracing::trace!(
        entity_name = descriptor.entity_name(),
        entity_id = ?id,
        identity = use_identity_column,
        "saving placeholder published"
    );

    let action = ctx.save_action();
    cascade(
        session,
        action,
        CascadePoint::BeforeInsertAfterDelete,
        &descriptor,
        entity,
        ctx,
    )
    .await?;

    let mut values = descriptor.get_property_values_to_insert(entity, ctx.merge_map());
    let names = descriptor.property_names();
    let types = descriptor.property_types();

    let mut substitute =
        session
            .interceptor()
            .on_save(entity, id.as_ref(), &mut values, &names, &types)?;
    substitute = versioning::seed_version(&mut values, &descriptor) || substitute;
    if descriptor.has_collections() {
        substitute = wrap_visitor::wrap_collections(session, entity, &descriptor, &mut values) || substitute;
    }
    if substitute {
        descriptor.set_property_values(entity, &values);
    }
    deep_copy(&mut values, &types, &descriptor.property_updatability());
    if nullify_unsaved_references(session, entity, &descriptor, &mut values) {
        session.persistence_context_mut().defer_reference_update(entity);
    }

    let insert = if use_identity_column {
        EntityAction::identity_insert(
            descriptor.clone(),
            entity.clone(),
            values,
            should_delay_identity_inserts,
        )
    } else {
        let id = id.ok_or_else(|| ReposeError::NullIdentifier {
            entity_name: descriptor.entity_name().to_string(),
        })?;
        let version = versioning::get_version(&values, &descriptor);
        EntityAction::regular_insert(descriptor.clone(), entity.clone(), id, values, version)
    };
    session.enqueue(insert).await?;

    let current = session
        .persistence_context()
        .get_entry(entity)
        .map(|entry| entry.serial());
    if let Some(current) = current {
        if current != original {
            session
                .persistence_context_mut()
                .copy_missing_extra_state(original, current);
        }
    }

    cascade(
        session,
        action,
        CascadePoint::AfterInsertBeforeDelete,
        &descriptor,
        entity,
        ctx,
    )
    .await
}

/// Replace to-one references to instances whose identity insert has neither
/// run nor been queued (they are further up the current save) with null.
/// The entity itself keeps the reference and reports it dirty. Returns
/// whether anything changed.
fn nullify_unsaved_references(
    session: &Session,
    entity: &EntityRef,
    descriptor: &EntityDescriptor,
    values: &mut [Value],
) -> bool {
    let mut nullified = false;
    for (value, attribute) in values.iter_mut().zip(descriptor.attributes()) {
        if !attribute.handler.is_entity_type() {
            continue;
        }
        let Value::Entity(referent) = &*value else {
            continue;
        };
        let unsaved = session
            .persistence_context()
            .get_entry(referent)
            .is_some_and(|entry| entry.status() == Status::Saving && entry.id().is_none())
            && !session.action_queue().has_pending_insert(referent);
        if unsaved {
            tracing::trace!(
                entity_name = descriptor.entity_name(),
                attribute = attribute.name.as_str(),
                "reference to unsaved instance deferred"
            );
            *value = Value::Null;
            entity.mark_dirty(&attribute.name);
            nullified = true;
        }
    }
    nullified
}
