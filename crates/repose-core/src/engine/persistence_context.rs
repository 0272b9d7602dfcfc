//! The first-level cache of a session
//!
//! Invariants maintained here:
//! - at most one instance per [`EntityKey`];
//! - if `get_entity(k) == x` then `entry(x).id == k.id` and the entry's
//!   descriptor belongs to `k`'s hierarchy;
//! - entries are looked up by object identity, never by value.

use crate::engine::entry::{EntityEntry, EntryInit, EntrySerial, Status};
use crate::engine::extra_state::ExtraStates;
use crate::engine::key::EntityKey;
use crate::errors::{ReposeError, Result};
use crate::model::collection::PersistentCollection;
use crate::model::entity::{EntityRef, InstanceId, ProxyRef};
use crate::model::value::{Identifier, Value};
use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

struct Managed {
    entity: EntityRef,
    entry: EntityEntry,
}

#[derive(Default)]
pub struct PersistenceContext {
    entities_by_key: HashMap<EntityKey, EntityRef>,
    entries: HashMap<InstanceId, Managed>,
    extra_states: ExtraStates,
    proxies_by_key: HashMap<EntityKey, ProxyRef>,
    snapshots: HashMap<EntityKey, Option<Vec<Value>>>,
    new_collections: Vec<PersistentCollection>,
    /// Instances inserted with a foreign key left null
    deferred_references: Vec<EntityRef>,
    next_serial: u64,
}

impl PersistenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `entity` with a new entry and register both index sides (the
    /// key side only when the id is known)
    ///
    /// Fails when the instance already has an entry, or when a different
    /// instance holds the key.
    pub fn add_entry(&mut self, entity: &EntityRef, init: EntryInit) -> Result<EntrySerial> {
        if self.entries.contains_key(&entity.instance_id()) {
            return Err(ReposeError::assertion(format!(
                "{} {} already has an entry",
                entity.entity_name(),
                entity.instance_id()
            )));
        }
        self.insert_entry(entity, init)
    }

    /// Replace the entry of an already admitted instance with a fresh one
    pub fn replace_entry(&mut self, entity: &EntityRef, init: EntryInit) -> Result<EntrySerial> {
        let previous = self
            .entries
            .remove(&entity.instance_id())
            .ok_or_else(|| ReposeError::NotManaged {
                entity_name: entity.entity_name().to_string(),
            })?;
        if let Some(key) = previous.entry.entity_key() {
            self.remove_key_if_held_by(&key, entity);
        }
        match self.insert_entry(entity, init) {
            Ok(serial) => Ok(serial),
            Err(err) => {
                // Put the previous entry back so a failed replacement is a no-op
                if let Some(key) = previous.entry.entity_key() {
                    self.entities_by_key.insert(key, entity.clone());
                }
                self.entries.insert(entity.instance_id(), previous);
                Err(err)
            }
        }
    }

    fn insert_entry(&mut self, entity: &EntityRef, init: EntryInit) -> Result<EntrySerial> {
        let key = init
            .id
            .clone()
            .map(|id| EntityKey::for_descriptor(&init.descriptor, id));
        if let Some(key) = &key {
            if let Some(holder) = self.entities_by_key.get(key) {
                if !holder.same_instance(entity) {
                    return Err(ReposeError::NonUniqueObject {
                        entity_name: init.descriptor.entity_name().to_string(),
                        id: key.id().to_string(),
                    });
                }
            }
        }

        self.next_serial += 1;
        let serial = EntrySerial(self.next_serial);
        self.entries.insert(
            entity.instance_id(),
            Managed {
                entity: entity.clone(),
                entry: EntityEntry::new(serial, init),
            },
        );
        if let Some(key) = key {
            self.entities_by_key.insert(key, entity.clone());
        }
        Ok(serial)
    }

    pub fn get_entity(&self, key: &EntityKey) -> Option<EntityRef> {
        self.entities_by_key.get(key).cloned()
    }

    pub fn get_entry(&self, entity: &EntityRef) -> Option<&EntityEntry> {
        self.entries.get(&entity.instance_id()).map(|m| &m.entry)
    }

    pub(crate) fn get_entry_mut(&mut self, entity: &EntityRef) -> Option<&mut EntityEntry> {
        self.entries.get_mut(&entity.instance_id()).map(|m| &mut m.entry)
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.entries.contains_key(&entity.instance_id())
    }

    /// Withdraw `entity`'s entry, its key and its extra states
    pub fn remove_entry(&mut self, entity: &EntityRef) -> Option<EntityEntry> {
        let managed = self.entries.remove(&entity.instance_id())?;
        if let Some(key) = managed.entry.entity_key() {
            self.remove_key_if_held_by(&key, entity);
            self.snapshots.remove(&key);
        }
        self.extra_states.remove(managed.entry.serial());
        Some(managed.entry)
    }

    fn remove_key_if_held_by(&mut self, key: &EntityKey, entity: &EntityRef) {
        if self
            .entities_by_key
            .get(key)
            .is_some_and(|holder| holder.same_instance(entity))
        {
            self.entities_by_key.remove(key);
        }
    }

    pub(crate) fn set_status(&mut self, entity: &EntityRef, status: Status) -> Result<()> {
        let entry = self.get_entry_mut(entity).ok_or_else(|| ReposeError::NotManaged {
            entity_name: entity.entity_name().to_string(),
        })?;
        entry.set_status(status);
        Ok(())
    }

    /// Record an id that became known after admission (identity inserts)
    /// and register the key side
    pub fn add_entity_key(&mut self, entity: &EntityRef, id: Identifier) -> Result<EntityKey> {
        let entry = self.get_entry(entity).ok_or_else(|| ReposeError::NotManaged {
            entity_name: entity.entity_name().to_string(),
        })?;
        let key = EntityKey::for_descriptor(entry.descriptor(), id.clone());
        if let Some(holder) = self.entities_by_key.get(&key) {
            if !holder.same_instance(entity) {
                return Err(ReposeError::NonUniqueObject {
                    entity_name: entity.entity_name().to_string(),
                    id: id.to_string(),
                });
            }
        }
        if let Some(entry) = self.get_entry_mut(entity) {
            entry.set_id(id);
        }
        self.entities_by_key.insert(key.clone(), entity.clone());
        Ok(key)
    }

    /// Register `value` with this context when it is a proxy
    ///
    /// Returns `true` when `value` is a proxy whose target is not loaded;
    /// such values must not be traversed. Calling it again for the same
    /// proxy changes nothing.
    pub fn reassociate_proxy_if_necessary(&mut self, value: &Value, id: Option<&Identifier>) -> bool {
        let Value::Proxy(proxy) = value else {
            return false;
        };
        if let Some(id) = id {
            if proxy.id() != *id {
                proxy.set_id(id.clone());
            }
        }
        let key = EntityKey::new(proxy.root_entity_name(), proxy.id());
        if !self.proxies_by_key.contains_key(&key) {
            self.proxies_by_key.insert(key, proxy.clone());
            proxy.set_associated(true);
        }
        !proxy.is_initialized()
    }

    pub fn proxy_for(&self, key: &EntityKey) -> Option<ProxyRef> {
        self.proxies_by_key.get(key).cloned()
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies_by_key.len()
    }

    // ----- database snapshot cache -----

    /// `Some(None)` means the row is known to be absent
    pub fn cached_snapshot(&self, key: &EntityKey) -> Option<Option<Vec<Value>>> {
        self.snapshots.get(key).cloned()
    }

    pub fn cache_snapshot(&mut self, key: EntityKey, snapshot: Option<Vec<Value>>) {
        self.snapshots.insert(key, snapshot);
    }

    pub fn evict_snapshot(&mut self, key: &EntityKey) {
        self.snapshots.remove(key);
    }

    pub fn clear_snapshots(&mut self) {
        self.snapshots.clear();
    }

    // ----- extra state -----

    pub fn add_extra_state<T: Any>(&mut self, entry: EntrySerial, value: T) {
        self.extra_states.insert(entry, value);
    }

    pub fn extra_state<T: Any>(&self, entry: EntrySerial) -> Option<Rc<T>> {
        self.extra_states.get(entry)
    }

    pub fn copy_missing_extra_state(&mut self, from: EntrySerial, to: EntrySerial) {
        self.extra_states.copy_missing(from, to);
    }

    // ----- collections -----

    pub fn add_new_collection(&mut self, collection: PersistentCollection) {
        if !self
            .new_collections
            .iter()
            .any(|c| c.same_collection(&collection))
        {
            self.new_collections.push(collection);
        }
    }

    pub fn new_collections(&self) -> &[PersistentCollection] {
        &self.new_collections
    }

    pub(crate) fn clear_new_collections(&mut self) {
        self.new_collections.clear();
    }

    // ----- deferred references -----

    /// Remember that `entity`'s insert left a reference unbound; the next
    /// flush writes it once the insert has run
    pub fn defer_reference_update(&mut self, entity: &EntityRef) {
        if !self.deferred_references.iter().any(|e| e.same_instance(entity)) {
            self.deferred_references.push(entity.clone());
        }
    }

    pub fn deferred_references(&self) -> &[EntityRef] {
        &self.deferred_references
    }

    pub(crate) fn take_deferred_references(&mut self) -> Vec<EntityRef> {
        std::mem::take(&mut self.deferred_references)
    }

    // ----- iteration -----

    /// Managed instances in admission order
    pub fn entries(&self) -> Vec<EntityRef> {
        let mut managed: Vec<&Managed> = self.entries.values().collect();
        managed.sort_by_key(|m| m.entry.serial());
        managed.into_iter().map(|m| m.entity.clone()).collect()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entity_count(&self) -> usize {
        self.entities_by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        for proxy in self.proxies_by_key.values() {
            proxy.set_associated(false);
        }
        self.entities_by_key.clear();
        self.entries.clear();
        self.extra_states.clear();
        self.proxies_by_key.clear();
        self.snapshots.clear();
        self.new_collections.clear();
        self.deferred_references.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::entry::LockMode;
    use crate::model::descriptor::{EntityDescriptor, IdStrategy};
    use crate::model::value::IdType;
    use std::sync::Arc;

    fn book() -> Arc<EntityDescriptor> {
        Arc::new(
            EntityDescriptor::builder("Book", "books")
                .id("id", "id", IdType::Long, IdStrategy::Assigned)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_add_entry_registers_both_sides() {
        let mut pc = PersistenceContext::new();
        let e = EntityRef::new("Book").with_id(1);
        pc.add_entry(&e, EntryInit::saving(book(), Some(Identifier::Long(1)), false))
            .unwrap();

        let key = EntityKey::new("Book", Identifier::Long(1));
        assert!(pc.get_entity(&key).unwrap().same_instance(&e));
        assert_eq!(pc.get_entry(&e).unwrap().status(), Status::Saving);
        assert_eq!(pc.get_entry(&e).unwrap().lock_mode(), LockMode::Write);
    }

    #[test]
    fn test_add_entry_twice_is_assertion_failure() {
        let mut pc = PersistenceContext::new();
        let e = EntityRef::new("Book");
        pc.add_entry(&e, EntryInit::saving(book(), None, true)).unwrap();
        let err = pc
            .add_entry(&e, EntryInit::saving(book(), None, true))
            .unwrap_err();
        assert!(matches!(err, ReposeError::AssertionFailure { .. }));
    }

    #[test]
    fn test_unknown_id_registers_entry_only() {
        let mut pc = PersistenceContext::new();
        let e = EntityRef::new("Book");
        pc.add_entry(&e, EntryInit::saving(book(), None, true)).unwrap();
        assert_eq!(pc.entry_count(), 1);
        assert_eq!(pc.entity_count(), 0);

        let key = pc.add_entity_key(&e, Identifier::Long(10)).unwrap();
        assert!(pc.get_entity(&key).unwrap().same_instance(&e));
        assert_eq!(pc.get_entry(&e).unwrap().id(), Some(&Identifier::Long(10)));
    }

    #[test]
    fn test_remove_entry_clears_key() {
        let mut pc = PersistenceContext::new();
        let e = EntityRef::new("Book").with_id(2);
        pc.add_entry(&e, EntryInit::saving(book(), Some(Identifier::Long(2)), false))
            .unwrap();
        let removed = pc.remove_entry(&e).unwrap();
        assert_eq!(removed.status(), Status::Saving);
        assert!(pc
            .get_entity(&EntityKey::new("Book", Identifier::Long(2)))
            .is_none());
        assert!(pc.remove_entry(&e).is_none());
    }

    #[test]
    fn test_replace_entry_issues_new_serial() {
        let mut pc = PersistenceContext::new();
        let e = EntityRef::new("Book").with_id(3);
        let first = pc
            .add_entry(&e, EntryInit::saving(book(), Some(Identifier::Long(3)), false))
            .unwrap();
        let second = pc
            .replace_entry(&e, EntryInit::saving(book(), Some(Identifier::Long(3)), false))
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(pc.get_entry(&e).unwrap().serial(), second);
    }

    #[test]
    fn test_reassociate_proxy_is_idempotent() {
        let mut pc = PersistenceContext::new();
        let proxy = book().create_proxy(Identifier::Long(8));
        let value = Value::Proxy(proxy.clone());

        assert!(pc.reassociate_proxy_if_necessary(&value, None));
        assert!(pc.reassociate_proxy_if_necessary(&value, None));
        assert_eq!(pc.proxy_count(), 1);
        assert!(proxy.is_associated());

        proxy.initialize(EntityRef::new("Book").with_id(8));
        assert!(!pc.reassociate_proxy_if_necessary(&value, None));
        assert!(!pc.reassociate_proxy_if_necessary(&Value::Integer(1), None));
    }

    #[test]
    fn test_snapshot_cache_distinguishes_absent_row() {
        let mut pc = PersistenceContext::new();
        let key = EntityKey::new("Book", Identifier::Long(999));
        assert_eq!(pc.cached_snapshot(&key), None);
        pc.cache_snapshot(key.clone(), None);
        assert_eq!(pc.cached_snapshot(&key), Some(None));
        pc.clear_snapshots();
        assert_eq!(pc.cached_snapshot(&key), None);
    }

    #[test]
    fn test_entries_in_admission_order() {
        let mut pc = PersistenceContext::new();
        let ids: Vec<EntityRef> = (1..=5).map(|i| EntityRef::new("Book").with_id(i)).collect();
        for e in ids.iter().rev() {
            let id = e.id();
            pc.add_entry(e, EntryInit::saving(book(), id, false)).unwrap();
        }
        let order: Vec<Option<Identifier>> =
            pc.entries().iter().map(|e| e.id()).collect();
        let expected: Vec<Option<Identifier>> =
            (1..=5).rev().map(|i| Some(Identifier::Long(i))).collect();
        assert_eq!(order, expected);
    }
}
