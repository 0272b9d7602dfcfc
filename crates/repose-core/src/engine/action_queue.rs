//! Deferred write actions and their ordered execution
//!
//! Actions are ranked: inserts run first, then updates, then deletes.
//! Inside a rank, actions run in submission order. An action leaves the
//! queue only once its statement has succeeded, so dropping an
//! `execute_pending` future between statements leaves the remaining
//! actions queued.

use crate::connection::ReactiveConnection;
use crate::engine::entry::{EntryInit, Status};
use crate::engine::key::EntityKey;
use crate::engine::persistence_context::PersistenceContext;
use crate::errors::{ReposeError, Result};
use crate::model::descriptor::EntityDescriptor;
use crate::model::entity::EntityRef;
use crate::model::value::{Identifier, Value};
use crate::session::factory::SessionFactory;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Insert whose identifier is produced by the database
    IdentityInsert,
    RegularInsert,
    Update,
    Delete,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::IdentityInsert => "identity_insert",
            ActionKind::RegularInsert => "insert",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One queued statement against one entity instance
#[derive(Debug, Clone)]
pub struct EntityAction {
    kind: ActionKind,
    descriptor: Arc<EntityDescriptor>,
    entity: EntityRef,
    id: Option<Identifier>,
    values: Vec<Value>,
    /// Version the row holds before this action runs
    version: Option<Value>,
    /// Version the row holds after an update
    next_version: Option<Value>,
    /// Identity inserts only: execute inside `add` instead of at flush
    early: bool,
}

impl EntityAction {
    pub fn identity_insert(
        descriptor: Arc<EntityDescriptor>,
        entity: EntityRef,
        values: Vec<Value>,
        should_delay_identity_inserts: bool,
    ) -> Self {
        Self {
            kind: ActionKind::IdentityInsert,
            descriptor,
            entity,
            id: None,
            values,
            version: None,
            next_version: None,
            early: !should_delay_identity_inserts,
        }
    }

    pub fn regular_insert(
        descriptor: Arc<EntityDescriptor>,
        entity: EntityRef,
        id: Identifier,
        values: Vec<Value>,
        version: Option<Value>,
    ) -> Self {
        Self {
            kind: ActionKind::RegularInsert,
            descriptor,
            entity,
            id: Some(id),
            values,
            version,
            next_version: None,
            early: false,
        }
    }

    pub fn update(
        descriptor: Arc<EntityDescriptor>,
        entity: EntityRef,
        id: Identifier,
        values: Vec<Value>,
        previous_version: Option<Value>,
        next_version: Option<Value>,
    ) -> Self {
        Self {
            kind: ActionKind::Update,
            descriptor,
            entity,
            id: Some(id),
            values,
            version: previous_version,
            next_version,
            early: false,
        }
    }

    pub fn delete(
        descriptor: Arc<EntityDescriptor>,
        entity: EntityRef,
        id: Identifier,
        version: Option<Value>,
    ) -> Self {
        Self {
            kind: ActionKind::Delete,
            descriptor,
            entity,
            id: Some(id),
            values: Vec::new(),
            version,
            next_version: None,
            early: false,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    pub fn id(&self) -> Option<&Identifier> {
        self.id.as_ref()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn version(&self) -> Option<&Value> {
        self.version.as_ref()
    }

    pub fn next_version(&self) -> Option<&Value> {
        self.next_version.as_ref()
    }

    pub fn should_delay_identity_inserts(&self) -> bool {
        !self.early
    }

    fn entity_id_label(&self) -> String {
        self.id
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| self.entity.id().map(|id| id.to_string()))
            .unwrap_or_else(|| "?".to_string())
    }
}

/// What an action needs to run: the connection, the session's context
/// and the factory's per-entity statements
pub struct ExecutionContext<'a> {
    pub connection: &'a dyn ReactiveConnection,
    pub persistence_context: &'a mut PersistenceContext,
    pub factory: &'a SessionFactory,
}

/// Counts of executed statements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatistics {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

#[derive(Debug, Default)]
pub struct ActionQueue {
    insertions: VecDeque<EntityAction>,
    updates: VecDeque<EntityAction>,
    deletions: VecDeque<EntityAction>,
    statistics: QueueStatistics,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit an action
    ///
    /// A regular insert whose key is held by a different instance fails
    /// with [`ReposeError::NonUniqueObject`]. An identity insert that must
    /// not be delayed is executed before this returns.
    pub async fn add(&mut self, action: EntityAction, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        if action.kind == ActionKind::RegularInsert {
            if let Some(id) = &action.id {
                let key = EntityKey::for_descriptor(&action.descriptor, id.clone());
                if let Some(holder) = ctx.persistence_context.get_entity(&key) {
                    if !holder.same_instance(&action.entity) {
                        return Err(ReposeError::NonUniqueObject {
                            entity_name: action.descriptor.entity_name().to_string(),
                            id: id.to_string(),
                        });
                    }
                }
            }
        }

        tracing::trace!(
            action_kind = %action.kind,
            entity_name = action.descriptor.entity_name(),
            early = action.early,
            "action submitted"
        );

        if action.kind == ActionKind::IdentityInsert && action.early {
            execute(&action, ctx).await?;
            self.statistics.inserts += 1;
            return Ok(());
        }

        match action.kind {
            ActionKind::IdentityInsert | ActionKind::RegularInsert => self.insertions.push_back(action),
            ActionKind::Update => self.updates.push_back(action),
            ActionKind::Delete => self.deletions.push_back(action),
        }
        Ok(())
    }

    /// Execute every queued action, in rank order
    pub async fn execute_pending(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        while let Some(action) = self.insertions.front() {
            execute(action, ctx).await?;
            self.insertions.pop_front();
            self.statistics.inserts += 1;
        }
        while let Some(action) = self.updates.front() {
            execute(action, ctx).await?;
            self.updates.pop_front();
            self.statistics.updates += 1;
        }
        while let Some(action) = self.deletions.front() {
            execute(action, ctx).await?;
            self.deletions.pop_front();
            self.statistics.deletes += 1;
        }
        Ok(())
    }

    /// Withdraw the pending delete of `entity`, if any
    pub fn unschedule_deletion(&mut self, entity: &EntityRef) -> Option<EntityAction> {
        let position = self
            .deletions
            .iter()
            .position(|a| a.entity.same_instance(entity))?;
        self.deletions.remove(position)
    }

    pub fn has_pending_insert(&self, entity: &EntityRef) -> bool {
        self.insertions.iter().any(|a| a.entity.same_instance(entity))
    }

    pub fn has_pending_update(&self, entity: &EntityRef) -> bool {
        self.updates.iter().any(|a| a.entity.same_instance(entity))
    }

    /// Pending actions in execution order
    pub fn pending(&self) -> impl Iterator<Item = &EntityAction> {
        self.insertions
            .iter()
            .chain(self.updates.iter())
            .chain(self.deletions.iter())
    }

    pub fn statistics(&self) -> QueueStatistics {
        self.statistics
    }

    pub fn len(&self) -> usize {
        self.insertions.len() + self.updates.len() + self.deletions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every pending action (rollback, clear)
    pub fn clear(&mut self) {
        self.insertions.clear();
        self.updates.clear();
        self.deletions.clear();
    }
}

async fn execute(action: &EntityAction, ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let descriptor = &action.descriptor;
    let persister = ctx.factory.persister(descriptor.entity_name())?;
    let statements = persister.statements();
    let pc = &mut *ctx.persistence_context;

    match action.kind {
        ActionKind::IdentityInsert => {
            let sql = statements.identity_insert_sql();
            let params = statements.bind_identity_insert(descriptor, &action.values, pc)?;
            tracing::debug!(sql, entity_name = descriptor.entity_name(), "execute identity insert");
            let key = ctx.connection.insert_returning_key(sql, params).await?;
            let id = descriptor.id_type().from_sql(&key)?;
            action.entity.set_id(Some(id.clone()));
            make_managed(action, id, key.as_i64(), pc)?;
        }
        ActionKind::RegularInsert => {
            let id = required_id(action)?;
            let sql = statements.insert_sql();
            let params = statements.bind_insert(descriptor, id, &action.values, pc)?;
            tracing::debug!(sql, entity_name = descriptor.entity_name(), entity_id = %id, "execute insert");
            ctx.connection.execute(sql, params).await?;
            if let Some(entry) = pc.get_entry_mut(&action.entity) {
                entry.post_insert(action.values.clone(), action.version.clone());
            }
        }
        ActionKind::Update => {
            let id = required_id(action)?;
            if let Some(sql) = statements.update_sql() {
                let params =
                    statements.bind_update(descriptor, id, &action.values, action.version.as_ref(), pc)?;
                tracing::debug!(sql, entity_name = descriptor.entity_name(), entity_id = %id, "execute update");
                let rows = ctx.connection.execute(sql, params).await?;
                if rows == 0 {
                    return Err(stale(action));
                }
            }
            if let Some(entry) = pc.get_entry_mut(&action.entity) {
                entry.post_write(action.values.clone(), action.next_version.clone());
            }
            action.entity.clear_dirty_attributes();
        }
        ActionKind::Delete => {
            let id = required_id(action)?;
            let sql = statements.delete_sql();
            let params = statements.bind_delete(descriptor, id, action.version.as_ref(), pc)?;
            tracing::debug!(sql, entity_name = descriptor.entity_name(), entity_id = %id, "execute delete");
            let rows = ctx.connection.execute(sql, params).await?;
            if rows == 0 {
                return Err(stale(action));
            }
            pc.set_status(&action.entity, Status::Gone)?;
            pc.remove_entry(&action.entity);
        }
    }
    Ok(())
}

/// Replace the SAVING placeholder of an identity insert with a managed
/// entry under the generated key. An insert executed during its save
/// leaves extra state to the save; a delayed one carries it over here.
fn make_managed(
    action: &EntityAction,
    id: Identifier,
    row_id: Option<i64>,
    pc: &mut PersistenceContext,
) -> Result<()> {
    let previous = pc
        .get_entry(&action.entity)
        .map(|entry| (entry.serial(), entry.status()))
        .ok_or_else(|| ReposeError::NotManaged {
            entity_name: action.descriptor.entity_name().to_string(),
        })?;
    let version = crate::engine::versioning::get_version(&action.values, &action.descriptor);
    let mut init = EntryInit::inserted(
        action.descriptor.clone(),
        id,
        action.values.clone(),
        version,
        row_id,
    );
    if previous.1 != Status::Saving {
        init.status = previous.1;
    }
    let serial = pc.replace_entry(&action.entity, init)?;
    if !action.early {
        pc.copy_missing_extra_state(previous.0, serial);
    }
    Ok(())
}

fn required_id(action: &EntityAction) -> Result<&Identifier> {
    action.id.as_ref().ok_or_else(|| {
        ReposeError::assertion(format!(
            "{} action on {} has no identifier",
            action.kind,
            action.descriptor.entity_name()
        ))
    })
}

fn stale(action: &EntityAction) -> ReposeError {
    ReposeError::StaleObjectState {
        entity_name: action.descriptor.entity_name().to_string(),
        id: action.entity_id_label(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::descriptor::IdStrategy;
    use crate::model::value::IdType;

    fn book() -> Arc<EntityDescriptor> {
        Arc::new(
            EntityDescriptor::builder("Book", "books")
                .id("id", "id", IdType::Long, IdStrategy::Assigned)
                .build()
                .unwrap(),
        )
    }

    fn insert(id: i64) -> EntityAction {
        EntityAction::regular_insert(
            book(),
            EntityRef::new("Book").with_id(id),
            Identifier::Long(id),
            vec![],
            None,
        )
    }

    #[test]
    fn test_pending_follows_rank_then_submission_order() {
        let mut queue = ActionQueue::new();
        queue.deletions.push_back(EntityAction::delete(
            book(),
            EntityRef::new("Book").with_id(9),
            Identifier::Long(9),
            None,
        ));
        queue.insertions.push_back(insert(1));
        queue.insertions.push_back(insert(2));

        let order: Vec<(ActionKind, Option<Identifier>)> = queue
            .pending()
            .map(|a| (a.kind(), a.id().cloned()))
            .collect();
        assert_eq!(
            order,
            vec![
                (ActionKind::RegularInsert, Some(Identifier::Long(1))),
                (ActionKind::RegularInsert, Some(Identifier::Long(2))),
                (ActionKind::Delete, Some(Identifier::Long(9))),
            ]
        );
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_unschedule_deletion_is_identity_based() {
        let mut queue = ActionQueue::new();
        let doomed = EntityRef::new("Book").with_id(4);
        let twin = EntityRef::new("Book").with_id(4);
        queue.deletions.push_back(EntityAction::delete(
            book(),
            doomed.clone(),
            Identifier::Long(4),
            None,
        ));

        assert!(queue.unschedule_deletion(&twin).is_none());
        assert!(queue.unschedule_deletion(&doomed).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pending_insert_lookup_is_identity_based() {
        let mut queue = ActionQueue::new();
        let queued = EntityRef::new("Book").with_id(1);
        queue.insertions.push_back(EntityAction::regular_insert(
            book(),
            queued.clone(),
            Identifier::Long(1),
            vec![],
            None,
        ));

        assert!(queue.has_pending_insert(&queued));
        assert!(!queue.has_pending_insert(&EntityRef::new("Book").with_id(1)));
        assert!(!queue.has_pending_update(&queued));
    }

    #[test]
    fn test_identity_insert_delay_flag() {
        let delayed = EntityAction::identity_insert(book(), EntityRef::new("Book"), vec![], true);
        let early = EntityAction::identity_insert(book(), EntityRef::new("Book"), vec![], false);
        assert!(delayed.should_delay_identity_inserts());
        assert!(!early.should_delay_identity_inserts());
        assert!(delayed.id().is_none());
    }
}
