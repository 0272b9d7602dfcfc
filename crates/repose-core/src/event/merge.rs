//! Merge listener
//!
//! Copies the state of a possibly detached graph onto managed instances.
//! The merge map of the [`CascadeContext`] records original → copy by
//! object identity; a reference to an original anywhere in the graph is
//! replaced by its copy.

use crate::engine::cascade::{cascade, CascadeContext, CascadePoint, CascadingAction};
use crate::errors::{ReposeError, Result};
use crate::event::persist::entity_state;
use crate::event::{save, EntityState};
use crate::model::collection::CollectionValue;
use crate::model::descriptor::{EntityDescriptor, IdStrategy};
use crate::model::entity::{EntityRef, MergeMap};
use crate::model::value::Value;
use crate::session::Session;
use std::sync::Arc;

pub async fn on_merge(
    session: &mut Session,
    entity: &EntityRef,
    entity_name: Option<&str>,
    ctx: &mut CascadeContext,
) -> Result<EntityRef> {
    let map = merge_map(ctx)?;
    if let Some(copy) = map.copy_of(entity) {
        return Ok(copy);
    }
    if map.is_copy(entity) {
        return Ok(entity.clone());
    }

    let descriptor = session.entity_persister(entity_name, entity)?;
    let state = entity_state(session, entity, &descriptor).await?;
    tracing::trace!(entity_name = descriptor.entity_name(), state = ?state, "merge");

    match state {
        EntityState::Persistent => {
            merge_map_mut(ctx)?.insert(entity, entity.clone());
            for point in [
                CascadePoint::BeforeInsertAfterDelete,
                CascadePoint::AfterInsertBeforeDelete,
            ] {
                cascade(session, CascadingAction::Merge, point, &descriptor, entity, ctx).await?;
            }
            Ok(entity.clone())
        }
        EntityState::Deleted => Err(ReposeError::ObjectDeleted {
            entity_name: descriptor.entity_name().to_string(),
            id: entity.id().map(|id| id.to_string()).unwrap_or_default(),
            operation: "merge".to_string(),
        }),
        EntityState::Transient => merge_transient(session, entity, descriptor, ctx).await,
        EntityState::Detached => merge_detached(session, entity, descriptor, ctx).await,
    }
}

async fn merge_transient(
    session: &mut Session,
    entity: &EntityRef,
    descriptor: Arc<EntityDescriptor>,
    ctx: &mut CascadeContext,
) -> Result<EntityRef> {
    let copy = EntityRef::new(entity.entity_name());
    merge_map_mut(ctx)?.insert(entity, copy.clone());

    cascade(
        session,
        CascadingAction::Merge,
        CascadePoint::BeforeInsertAfterDelete,
        &descriptor,
        entity,
        ctx,
    )
    .await?;
    copy_values(&descriptor, entity, &copy, merge_map(ctx)?, false);

    ctx.visit(&copy);
    let requested = match descriptor.id_strategy() {
        IdStrategy::Assigned => descriptor.get_identifier(entity),
        _ => None,
    };
    match requested {
        Some(id) => {
            save::save_with_requested_id(session, &copy, id, Some(descriptor.entity_name()), ctx).await?
        }
        None => {
            save::save_with_generated_id(session, &copy, Some(descriptor.entity_name()), ctx, false).await?
        }
    }

    cascade(
        session,
        CascadingAction::Merge,
        CascadePoint::AfterInsertBeforeDelete,
        &descriptor,
        entity,
        ctx,
    )
    .await?;
    copy_collections(&descriptor, entity, &copy, merge_map(ctx)?);
    Ok(copy)
}

async fn merge_detached(
    session: &mut Session,
    entity: &EntityRef,
    descriptor: Arc<EntityDescriptor>,
    ctx: &mut CascadeContext,
) -> Result<EntityRef> {
    let Some(id) = descriptor.get_identifier(entity) else {
        return merge_transient(session, entity, descriptor, ctx).await;
    };

    let Some(managed) = session.find(descriptor.entity_name(), id.clone()).await? else {
        // The row is gone: merge recreates it
        tracing::debug!(
            entity_name = descriptor.entity_name(),
            entity_id = %id,
            "detached instance has no row, merging as transient"
        );
        return merge_transient(session, entity, descriptor, ctx).await;
    };

    if let Some(index) = descriptor.version_property() {
        let name = &descriptor.attributes()[index].name;
        let (detached_version, managed_version) = (entity.get(name), managed.get(name));
        if detached_version != managed_version {
            return Err(ReposeError::StaleObjectState {
                entity_name: descriptor.entity_name().to_string(),
                id: id.to_string(),
            });
        }
    }

    merge_map_mut(ctx)?.insert(entity, managed.clone());
    cascade(
        session,
        CascadingAction::Merge,
        CascadePoint::BeforeInsertAfterDelete,
        &descriptor,
        entity,
        ctx,
    )
    .await?;
    copy_values(&descriptor, entity, &managed, merge_map(ctx)?, true);
    cascade(
        session,
        CascadingAction::Merge,
        CascadePoint::AfterInsertBeforeDelete,
        &descriptor,
        entity,
        ctx,
    )
    .await?;
    copy_collections(&descriptor, entity, &managed, merge_map(ctx)?);
    Ok(managed)
}

/// Copy non-collection attributes, substituting merged copies for
/// originals. The version of a managed target is left alone; flush
/// increments it.
fn copy_values(
    descriptor: &EntityDescriptor,
    source: &EntityRef,
    target: &EntityRef,
    map: &MergeMap,
    keep_target_version: bool,
) {
    let version = descriptor.version_property();
    for (index, attribute) in descriptor.attributes().iter().enumerate() {
        if attribute.handler.is_collection_type() {
            continue;
        }
        if keep_target_version && Some(index) == version {
            continue;
        }
        let value = match source.get(&attribute.name) {
            Value::Entity(e) => Value::Entity(map.copy_of(&e).unwrap_or(e)),
            other => other,
        };
        if target.get(&attribute.name) != value {
            target.set(&attribute.name, value);
        }
    }
}

fn copy_collections(descriptor: &EntityDescriptor, source: &EntityRef, target: &EntityRef, map: &MergeMap) {
    for attribute in descriptor.attributes() {
        if !attribute.handler.is_collection_type() {
            continue;
        }
        let Value::Collection(collection) = source.get(&attribute.name) else {
            continue;
        };
        let elements: Vec<EntityRef> = collection
            .elements()
            .into_iter()
            .map(|e| map.copy_of(&e).unwrap_or(e))
            .collect();
        match target.get(&attribute.name) {
            Value::Collection(CollectionValue::Wrapped(wrapped)) => {
                for element in elements {
                    if !wrapped.elements().iter().any(|e| e.same_instance(&element)) {
                        wrapped.push(element);
                    }
                }
            }
            _ => target.set(&attribute.name, Value::from(elements)),
        }
    }
}

fn merge_map(ctx: &CascadeContext) -> Result<&MergeMap> {
    ctx.merge_map()
        .ok_or_else(|| ReposeError::assertion("merge cascade without a merge map"))
}

fn merge_map_mut(ctx: &mut CascadeContext) -> Result<&mut MergeMap> {
    ctx.merge_map_mut()
        .ok_or_else(|| ReposeError::assertion("merge cascade without a merge map"))
}
