//! Flush listener
//!
//! Three passes over the persistence context: persist-on-flush cascades
//! from every managed instance, a dirty check that queues updates, then
//! execution of the whole queue. References that inserts had to leave null
//! are written by a final round of updates.

use crate::engine::cascade::{cascade, CascadeContext, CascadePoint, CascadingAction};
use crate::engine::{versioning, EntityAction, LockMode, Status};
use crate::errors::Result;
use crate::model::collection::CollectionValue;
use crate::model::descriptor::EntityDescriptor;
use crate::model::entity::EntityRef;
use crate::model::types::deep_copy;
use crate::model::value::{Identifier, Value};
use crate::session::Session;
use std::sync::Arc;

pub async fn on_flush(session: &mut Session) -> Result<()> {
    cascade_on_flush(session).await?;

    let mut scheduled = 0usize;
    for entity in session.persistence_context().entries() {
        if schedule_update(session, &entity).await? {
            scheduled += 1;
        }
    }

    tracing::debug!(
        updates = scheduled,
        pending = session.action_queue().len(),
        "flushing action queue"
    );
    session.execute_pending().await?;
    write_deferred_references(session).await?;
    post_flush(session);
    Ok(())
}

/// Update instances whose insert left a reference null now that the
/// referent has an identifier. Instances already updated above are clean
/// against their written state and are skipped by the dirty check.
async fn write_deferred_references(session: &mut Session) -> Result<()> {
    let deferred = session.persistence_context_mut().take_deferred_references();
    if deferred.is_empty() {
        return Ok(());
    }
    let mut scheduled = 0usize;
    for entity in &deferred {
        if schedule_update(session, entity).await? {
            scheduled += 1;
        }
    }
    tracing::debug!(updates = scheduled, "writing deferred references");
    session.execute_pending().await
}

/// Reach transient instances from managed ones through `persist` cascades
async fn cascade_on_flush(session: &mut Session) -> Result<()> {
    let mut ctx = CascadeContext::new();
    for entity in session.persistence_context().entries() {
        let descriptor = match session.persistence_context().get_entry(&entity) {
            Some(entry) if matches!(entry.status(), Status::Managed | Status::Saving) => {
                entry.descriptor().clone()
            }
            _ => continue,
        };
        cascade(
            session,
            CascadingAction::PersistOnFlush,
            CascadePoint::BeforeFlush,
            &descriptor,
            &entity,
            &mut ctx,
        )
        .await?;
    }
    Ok(())
}

struct FlushCandidate {
    descriptor: Arc<EntityDescriptor>,
    id: Identifier,
    loaded: Vec<Value>,
    version: Option<Value>,
    force_increment: bool,
    increment_disabled: bool,
}

fn candidate(session: &Session, entity: &EntityRef) -> Option<FlushCandidate> {
    let entry = session.persistence_context().get_entry(entity)?;
    if entry.status() != Status::Managed {
        return None;
    }
    Some(FlushCandidate {
        descriptor: entry.descriptor().clone(),
        id: entry.id()?.clone(),
        loaded: entry.loaded_state()?.to_vec(),
        version: entry.version().cloned(),
        force_increment: entry.lock_mode() == LockMode::OptimisticForceIncrement,
        increment_disabled: entry.is_version_increment_disabled(),
    })
}

/// Indexes of updatable attributes whose value differs from the loaded
/// state. Instances that track their own dirtiness are only checked on the
/// attributes they report.
fn dirty_properties(descriptor: &EntityDescriptor, entity: &EntityRef, current: &[Value], loaded: &[Value]) -> Vec<usize> {
    let version = descriptor.version_property();
    let tracked = entity
        .is_dirtiness_tracked()
        .then(|| entity.dirty_attributes());

    descriptor
        .attributes()
        .iter()
        .enumerate()
        .filter(|(index, attribute)| {
            Some(*index) != version && attribute.updatable && !attribute.handler.is_collection_type()
        })
        .filter(|(_, attribute)| {
            tracked
                .as_ref()
                .map_or(true, |names| names.iter().any(|n| n == &attribute.name))
        })
        .filter(|(index, attribute)| {
            let old = loaded.get(*index).unwrap_or(&Value::Null);
            let new = current.get(*index).unwrap_or(&Value::Null);
            !attribute.handler.is_same(old, new)
        })
        .map(|(index, _)| index)
        .collect()
}

async fn schedule_update(session: &mut Session, entity: &EntityRef) -> Result<bool> {
    let Some(candidate) = candidate(session, entity) else {
        return Ok(false);
    };
    let descriptor = &candidate.descriptor;
    let current = descriptor.get_property_values(entity);
    let dirty = dirty_properties(descriptor, entity, &current, &candidate.loaded);
    if dirty.is_empty() && !candidate.force_increment {
        return Ok(false);
    }

    session.callbacks().pre_update(entity)?;
    let mut current = descriptor.get_property_values(entity);
    let names = descriptor.property_names();
    let types = descriptor.property_types();
    if session.interceptor().on_flush_dirty(
        entity,
        &candidate.id,
        &mut current,
        &candidate.loaded,
        &names,
        &types,
    )? {
        descriptor.set_property_values(entity, &current);
    }

    let next_version = match (descriptor.version_property(), descriptor.version_type()) {
        (Some(index), Some(version_type)) if !candidate.increment_disabled => {
            let previous = candidate
                .version
                .clone()
                .unwrap_or_else(|| current.get(index).cloned().unwrap_or_default());
            let next = versioning::increment(&previous, version_type)?;
            entity.set_untracked(&descriptor.attributes()[index].name, next.clone());
            current[index] = next.clone();
            Some(next)
        }
        _ => candidate.version.clone(),
    };

    deep_copy(&mut current, &types, &descriptor.property_updatability());

    if candidate.force_increment {
        if let Some(entry) = session.persistence_context_mut().get_entry_mut(entity) {
            entry.set_lock_mode(LockMode::Optimistic);
        }
    }

    tracing::trace!(
        entity_name = descriptor.entity_name(),
        entity_id = %candidate.id,
        dirty = dirty.len(),
        "update scheduled"
    );
    session
        .enqueue(EntityAction::update(
            descriptor.clone(),
            entity.clone(),
            candidate.id.clone(),
            current,
            candidate.version.clone(),
            next_version,
        ))
        .await?;
    Ok(true)
}

fn post_flush(session: &mut Session) {
    let pc = session.persistence_context_mut();
    pc.clear_snapshots();
    for collection in pc.new_collections() {
        collection.clear_dirty();
    }
    for entity in pc.entries() {
        let Some(descriptor) = pc.get_entry(&entity).map(|e| e.descriptor().clone()) else {
            continue;
        };
        for value in descriptor.get_property_values(&entity) {
            if let Value::Collection(CollectionValue::Wrapped(collection)) = value {
                collection.clear_dirty();
            }
        }
    }
    pc.clear_new_collections();
}
