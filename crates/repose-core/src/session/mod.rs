//! Sessions: one unit of work over one connection
//!
//! A [`Session`] owns the persistence context and the action queue. It is
//! deliberately `!Send`: every future it returns runs on the task that
//! owns it, and nothing inside needs synchronisation.

pub mod callbacks;
pub mod factory;
pub mod interceptor;

pub use callbacks::{Callback, CallbackRegistry};
pub use factory::{EntityPersister, SessionBuilder, SessionFactory};
pub use interceptor::{EmptyInterceptor, Interceptor};

use crate::connection::ReactiveConnection;
use crate::engine::{
    ActionQueue, CascadeContext, EntityAction, EntityKey, EntryInit, ExecutionContext, LockMode,
    PersistenceContext, Status,
};
use crate::errors::{ReposeError, Result};
use crate::event::{delete, flush, lock, merge, persist, refresh, save};
use crate::model::descriptor::EntityDescriptor;
use crate::model::entity::{EntityRef, ProxyRef};
use crate::model::value::{Identifier, Value};
use crate::{log_op_end, log_op_error, log_op_start};
use repose_core_types::RequestContext;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Default, Clone, Copy)]
struct TransactionState {
    active: bool,
    rollback_only: bool,
}

pub struct Session {
    factory: Arc<SessionFactory>,
    connection: Rc<dyn ReactiveConnection>,
    persistence_context: PersistenceContext,
    action_queue: ActionQueue,
    interceptor: Rc<dyn Interceptor>,
    callbacks: Rc<CallbackRegistry>,
    transaction: TransactionState,
    request_context: RequestContext,
    closed: bool,
}

impl Session {
    pub(crate) fn new(
        factory: Arc<SessionFactory>,
        connection: Rc<dyn ReactiveConnection>,
        interceptor: Rc<dyn Interceptor>,
        callbacks: Rc<CallbackRegistry>,
        request_context: RequestContext,
    ) -> Self {
        Self {
            factory,
            connection,
            persistence_context: PersistenceContext::new(),
            action_queue: ActionQueue::new(),
            interceptor,
            callbacks,
            transaction: TransactionState::default(),
            request_context,
            closed: false,
        }
    }

    // ===== Accessors used by the pipelines =====

    pub fn factory(&self) -> &Arc<SessionFactory> {
        &self.factory
    }

    pub fn connection(&self) -> &dyn ReactiveConnection {
        self.connection.as_ref()
    }

    /// Descriptor for `instance` handled as `entity_name` (defaults to the
    /// instance's own entity name)
    pub fn entity_persister(
        &self,
        entity_name: Option<&str>,
        instance: &EntityRef,
    ) -> Result<Arc<EntityDescriptor>> {
        let entity_name = entity_name.unwrap_or_else(|| instance.entity_name());
        self.factory.registry().resolve(entity_name, instance)
    }

    pub fn generate_entity_key(&self, id: Identifier, descriptor: &EntityDescriptor) -> EntityKey {
        EntityKey::for_descriptor(descriptor, id)
    }

    pub fn persistence_context(&self) -> &PersistenceContext {
        &self.persistence_context
    }

    pub fn persistence_context_mut(&mut self) -> &mut PersistenceContext {
        &mut self.persistence_context
    }

    pub fn is_transaction_in_progress(&self) -> bool {
        self.transaction.active
    }

    pub fn is_rollback_only(&self) -> bool {
        self.transaction.rollback_only
    }

    pub fn interceptor(&self) -> Rc<dyn Interceptor> {
        self.interceptor.clone()
    }

    pub fn callbacks(&self) -> Rc<CallbackRegistry> {
        self.callbacks.clone()
    }

    pub fn action_queue(&self) -> &ActionQueue {
        &self.action_queue
    }

    pub fn request_context(&self) -> &RequestContext {
        &self.request_context
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    /// Whether `entity` is managed and not scheduled for removal
    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.persistence_context
            .get_entry(entity)
            .is_some_and(|entry| !entry.status().is_deleted_or_gone())
    }

    // ===== Queue plumbing =====

    /// Submit an action to the queue; identity inserts that must not be
    /// delayed run before this returns
    pub(crate) async fn enqueue(&mut self, action: EntityAction) -> Result<()> {
        let Self {
            action_queue,
            connection,
            persistence_context,
            factory,
            ..
        } = self;
        let mut ctx = ExecutionContext {
            connection: connection.as_ref(),
            persistence_context,
            factory: factory.as_ref(),
        };
        let result = action_queue.add(action, &mut ctx).await;
        self.track(result)
    }

    /// Run every queued action
    pub(crate) async fn execute_pending(&mut self) -> Result<()> {
        let Self {
            action_queue,
            connection,
            persistence_context,
            factory,
            ..
        } = self;
        let mut ctx = ExecutionContext {
            connection: connection.as_ref(),
            persistence_context,
            factory: factory.as_ref(),
        };
        let result = action_queue.execute_pending(&mut ctx).await;
        self.track(result)
    }

    pub(crate) fn action_queue_mut(&mut self) -> &mut ActionQueue {
        &mut self.action_queue
    }

    /// Driver failures poison the transaction
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_database() && !self.transaction.rollback_only {
                self.transaction.rollback_only = true;
                tracing::warn!(error = %err, "session marked rollback-only");
            }
        }
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ReposeError::SessionClosed);
        }
        Ok(())
    }

    fn finish<T>(&self, op: &'static str, entity_name: &str, start: Instant, result: Result<T>) -> Result<T> {
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                log_op_end!(
                    op,
                    duration_ms = duration_ms,
                    entity_name = entity_name,
                    request_id = self.request_context.request_id.as_str()
                );
            }
            Err(err) => {
                log_op_error!(
                    op,
                    err.clone(),
                    duration_ms = duration_ms,
                    entity_name = entity_name,
                    request_id = self.request_context.request_id.as_str()
                );
            }
        }
        result
    }

    // ===== Operations =====

    /// Make a transient instance persistent, cascading along associations
    /// mapped with `persist`
    ///
    /// Identity-generated entities are inserted immediately when a
    /// transaction is active and at the next flush otherwise.
    ///
    /// # Errors
    ///
    /// [`ReposeError::DetachedEntity`] for detached instances, plus any
    /// error of the save pipeline.
    pub async fn persist(&mut self, entity: &EntityRef) -> Result<()> {
        self.ensure_open()?;
        log_op_start!("persist", entity_name = entity.entity_name());
        let start = Instant::now();
        let mut ctx = CascadeContext::new();
        let result = persist::on_persist(self, entity, None, &mut ctx).await;
        self.finish("persist", entity.entity_name(), start, result)
    }

    /// Save a transient instance and return its identifier
    ///
    /// Unlike [`persist`](Self::persist), the identifier is available when
    /// this returns, so identity inserts run immediately.
    ///
    /// # Errors
    ///
    /// [`ReposeError::NonUniqueObject`] when another instance holds the key,
    /// [`ReposeError::ObjectDeleted`] for an instance scheduled for removal.
    pub async fn save(&mut self, entity: &EntityRef) -> Result<Identifier> {
        self.ensure_open()?;
        log_op_start!("save", entity_name = entity.entity_name());
        let start = Instant::now();
        let result = self.save_inner(entity).await;
        self.finish("save", entity.entity_name(), start, result)
    }

    async fn save_inner(&mut self, entity: &EntityRef) -> Result<Identifier> {
        if let Some(entry) = self.persistence_context.get_entry(entity) {
            if entry.status().is_deleted_or_gone() {
                return Err(ReposeError::ObjectDeleted {
                    entity_name: entity.entity_name().to_string(),
                    id: entity.id().map(|id| id.to_string()).unwrap_or_default(),
                    operation: "save".to_string(),
                });
            }
            if let Some(id) = entry.id() {
                return Ok(id.clone());
            }
            // Identity insert still queued
            self.execute_pending().await?;
        } else {
            let mut ctx = CascadeContext::new();
            ctx.visit(entity);
            save::save_with_generated_id(self, entity, None, &mut ctx, true).await?;
        }
        self.persistence_context
            .get_entry(entity)
            .and_then(|entry| entry.id().cloned())
            .ok_or_else(|| ReposeError::assertion(format!("{} saved without identifier", entity.entity_name())))
    }

    /// Save a transient instance under an identifier chosen by the caller,
    /// bypassing the descriptor's generator
    pub async fn save_with_id(&mut self, entity: &EntityRef, id: impl Into<Identifier>) -> Result<()> {
        self.ensure_open()?;
        log_op_start!("save_with_id", entity_name = entity.entity_name());
        let start = Instant::now();
        let mut ctx = CascadeContext::new();
        ctx.visit(entity);
        let result = save::save_with_requested_id(self, entity, id.into(), None, &mut ctx).await;
        self.finish("save_with_id", entity.entity_name(), start, result)
    }

    /// Copy the state of `entity` onto a managed instance and return it
    ///
    /// Transient graphs produce new managed copies; `entity` itself never
    /// becomes managed unless it already was.
    pub async fn merge(&mut self, entity: &EntityRef) -> Result<EntityRef> {
        self.ensure_open()?;
        log_op_start!("merge", entity_name = entity.entity_name());
        let start = Instant::now();
        let mut ctx = CascadeContext::for_merge();
        let result = merge::on_merge(self, entity, None, &mut ctx).await;
        self.finish("merge", entity.entity_name(), start, result)
    }

    /// Schedule removal of a managed instance
    pub async fn remove(&mut self, entity: &EntityRef) -> Result<()> {
        self.ensure_open()?;
        log_op_start!("remove", entity_name = entity.entity_name());
        let start = Instant::now();
        let mut ctx = CascadeContext::new();
        let result = delete::on_delete(self, entity, None, &mut ctx).await;
        self.finish("remove", entity.entity_name(), start, result)
    }

    /// Re-read the state of a managed instance from the database
    pub async fn refresh(&mut self, entity: &EntityRef) -> Result<()> {
        self.ensure_open()?;
        log_op_start!("refresh", entity_name = entity.entity_name());
        let start = Instant::now();
        let mut ctx = CascadeContext::new();
        let result = refresh::on_refresh(self, entity, &mut ctx).await;
        self.finish("refresh", entity.entity_name(), start, result)
    }

    /// Obtain `lock_mode` on a managed instance; optimistic modes verify
    /// the stored version
    pub async fn lock(&mut self, entity: &EntityRef, lock_mode: LockMode) -> Result<()> {
        self.ensure_open()?;
        log_op_start!("lock", entity_name = entity.entity_name());
        let start = Instant::now();
        let mut ctx = CascadeContext::for_lock(lock_mode);
        let result = lock::on_lock(self, entity, &mut ctx).await;
        self.finish("lock", entity.entity_name(), start, result)
    }

    /// Cascade persist-on-flush, schedule updates for dirty instances and
    /// execute every queued action
    pub async fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        log_op_start!("flush", entity_count = self.persistence_context.entry_count() as u64);
        let start = Instant::now();
        let result = flush::on_flush(self).await;
        self.finish("flush", "*", start, result)
    }

    /// The managed instance with this identifier, loading it if needed.
    /// `None` if no such row exists or the instance was removed.
    pub async fn find(&mut self, entity_name: &str, id: impl Into<Identifier>) -> Result<Option<EntityRef>> {
        self.ensure_open()?;
        let descriptor = self.factory.persister(entity_name)?.descriptor().clone();
        let id = descriptor.id_type().coerce(&id.into())?;
        let key = EntityKey::for_descriptor(&descriptor, id.clone());

        if let Some(existing) = self.persistence_context.get_entity(&key) {
            let removed = self
                .persistence_context
                .get_entry(&existing)
                .is_some_and(|entry| entry.status().is_deleted_or_gone());
            if removed {
                return Ok(None);
            }
            if !self
                .factory
                .registry()
                .is_subclass_of(existing.entity_name(), entity_name)
            {
                return Err(ReposeError::WrongEntityType {
                    expected: entity_name.to_string(),
                    actual: existing.entity_name().to_string(),
                });
            }
            return Ok(Some(existing));
        }

        let Some(state) = self.get_database_snapshot(entity_name, &id).await? else {
            return Ok(None);
        };
        let entity = descriptor.instantiate(Some(id.clone()));
        self.load_into(&descriptor, &entity, &id, state, LockMode::Read)?;
        if let Some(proxy) = self.persistence_context.proxy_for(&key) {
            proxy.initialize(entity.clone());
        }
        tracing::trace!(entity_name, entity_id = %id, "loaded instance");
        Ok(Some(entity))
    }

    /// A reference to the instance with this identifier without loading it:
    /// the managed instance if there is one, otherwise a proxy
    pub fn reference(&mut self, entity_name: &str, id: impl Into<Identifier>) -> Result<Value> {
        self.ensure_open()?;
        let descriptor = self.factory.persister(entity_name)?.descriptor().clone();
        let id = descriptor.id_type().coerce(&id.into())?;
        Ok(self.reference_for(&descriptor, id))
    }

    fn reference_for(&mut self, descriptor: &EntityDescriptor, id: Identifier) -> Value {
        let key = EntityKey::for_descriptor(descriptor, id.clone());
        if let Some(entity) = self.persistence_context.get_entity(&key) {
            return Value::Entity(entity);
        }
        if let Some(proxy) = self.persistence_context.proxy_for(&key) {
            return Value::Proxy(proxy);
        }
        let proxy = Value::Proxy(descriptor.create_proxy(id));
        self.persistence_context
            .reassociate_proxy_if_necessary(&proxy, None);
        proxy
    }

    /// Load the target of `proxy` if it is not loaded yet
    pub async fn initialize_proxy(&mut self, proxy: &ProxyRef) -> Result<EntityRef> {
        if let Some(target) = proxy.target() {
            return Ok(target);
        }
        let target = self
            .find(proxy.entity_name(), proxy.id())
            .await?
            .ok_or_else(|| ReposeError::ObjectNotFound {
                entity_name: proxy.entity_name().to_string(),
                id: proxy.id().to_string(),
            })?;
        proxy.initialize(target.clone());
        Ok(target)
    }

    /// Current database state of a row, cached per key until the next flush
    /// when snapshot caching is enabled
    pub async fn get_database_snapshot(
        &mut self,
        entity_name: &str,
        id: &Identifier,
    ) -> Result<Option<Vec<Value>>> {
        let factory = self.factory.clone();
        let persister = factory.persister(entity_name)?;
        let key = EntityKey::for_descriptor(persister.descriptor(), id.clone());
        let caching = factory.settings().cache_database_snapshots;

        if caching {
            if let Some(cached) = self.persistence_context.cached_snapshot(&key) {
                return Ok(cached);
            }
        }
        let result = persister
            .snapshot_loader()
            .load_snapshot(id, self.connection.as_ref())
            .await;
        let snapshot = self.track(result)?;
        if caching {
            self.persistence_context.cache_snapshot(key, snapshot.clone());
        }
        Ok(snapshot)
    }

    /// Hydrate `entity` from a row snapshot and register it as loaded
    pub(crate) fn load_into(
        &mut self,
        descriptor: &Arc<EntityDescriptor>,
        entity: &EntityRef,
        id: &Identifier,
        state: Vec<Value>,
        lock_mode: LockMode,
    ) -> Result<()> {
        let values = self.materialize(descriptor, entity, &state)?;
        descriptor.hydrate(entity, &values);
        entity.clear_dirty_attributes();

        let init = EntryInit::loaded(descriptor.clone(), id.clone(), state, lock_mode);
        let previous = self.persistence_context.get_entry(entity).map(|e| e.serial());
        match previous {
            Some(old) => {
                let new = self.persistence_context.replace_entry(entity, init)?;
                self.persistence_context.copy_missing_extra_state(old, new);
            }
            None => {
                self.persistence_context.add_entry(entity, init)?;
            }
        }
        self.callbacks.post_load(entity)
    }

    /// Turn snapshot values into property values: association identifiers
    /// become managed instances or proxies, collection slots keep the
    /// instance's current value
    fn materialize(
        &mut self,
        descriptor: &EntityDescriptor,
        entity: &EntityRef,
        state: &[Value],
    ) -> Result<Vec<Value>> {
        let factory = self.factory.clone();
        descriptor
            .attributes()
            .iter()
            .zip(state)
            .map(|(attribute, raw)| {
                if attribute.handler.is_collection_type() {
                    return Ok(entity.get(&attribute.name));
                }
                let Some(target) = attribute.handler.associated_entity() else {
                    return Ok(raw.clone());
                };
                let target = factory.registry().get(target)?;
                Ok(match target.id_type().from_value(raw)? {
                    None => Value::Null,
                    Some(id) => self.reference_for(&target, id),
                })
            })
            .collect()
    }

    // ===== Transactions =====

    pub async fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.transaction.active {
            return Err(ReposeError::TransactionAlreadyActive);
        }
        let result = self.connection.begin().await;
        self.track(result)?;
        self.transaction = TransactionState {
            active: true,
            rollback_only: false,
        };
        tracing::debug!(request_id = self.request_context.request_id.as_str(), "transaction begun");
        Ok(())
    }

    /// Flush and commit. A rollback-only transaction is rolled back instead
    /// and [`ReposeError::RollbackOnly`] is returned.
    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.transaction.active {
            return Err(ReposeError::NoTransaction);
        }
        if self.transaction.rollback_only {
            self.rollback().await?;
            return Err(ReposeError::RollbackOnly);
        }
        self.flush().await?;
        let result = self.connection.commit().await;
        self.track(result)?;
        self.transaction.active = false;
        tracing::debug!(request_id = self.request_context.request_id.as_str(), "transaction committed");
        Ok(())
    }

    /// Roll back, discarding queued actions and the persistence context
    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.transaction.active {
            return Err(ReposeError::NoTransaction);
        }
        self.transaction = TransactionState::default();
        self.action_queue.clear();
        self.persistence_context.clear();
        self.connection.rollback().await?;
        tracing::debug!(request_id = self.request_context.request_id.as_str(), "transaction rolled back");
        Ok(())
    }

    /// Detach every managed instance and drop queued actions
    pub fn clear(&mut self) {
        self.action_queue.clear();
        self.persistence_context.clear();
    }

    pub fn close(&mut self) {
        self.clear();
        self.closed = true;
    }

    pub(crate) fn set_status(&mut self, entity: &EntityRef, status: Status) -> Result<()> {
        self.persistence_context.set_status(entity, status)
    }
}
