//! Dynamically typed entity instances and lazy references
//!
//! An [`EntityRef`] is a shared handle; clones point at the same instance.
//! Instances are identified by an [`InstanceId`] allocated at construction,
//! which is what the persistence context indexes on. Two instances with the
//! same entity name and identifier are still two distinct objects.

use crate::model::value::{Identifier, Value};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique object identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    fn next() -> Self {
        InstanceId(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

struct EntityState {
    id: Option<Identifier>,
    attributes: BTreeMap<String, Value>,
    /// `Some` when the instance tracks its own dirty attributes
    dirty: Option<BTreeSet<String>>,
}

struct EntityInstance {
    instance_id: InstanceId,
    entity_name: String,
    state: RefCell<EntityState>,
}

#[derive(Clone)]
pub struct EntityRef(Rc<EntityInstance>);

impl EntityRef {
    pub fn new(entity_name: impl Into<String>) -> Self {
        EntityRef(Rc::new(EntityInstance {
            instance_id: InstanceId::next(),
            entity_name: entity_name.into(),
            state: RefCell::new(EntityState {
                id: None,
                attributes: BTreeMap::new(),
                dirty: None,
            }),
        }))
    }

    pub fn with_id(self, id: impl Into<Identifier>) -> Self {
        self.set_id(Some(id.into()));
        self
    }

    pub fn with(self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Opt into the self-dirtiness tracker capability
    pub fn tracking_dirtiness(self) -> Self {
        self.0.state.borrow_mut().dirty = Some(BTreeSet::new());
        self
    }

    pub fn instance_id(&self) -> InstanceId {
        self.0.instance_id
    }

    pub fn entity_name(&self) -> &str {
        &self.0.entity_name
    }

    pub fn id(&self) -> Option<Identifier> {
        self.0.state.borrow().id.clone()
    }

    pub fn set_id(&self, id: Option<Identifier>) {
        self.0.state.borrow_mut().id = id;
    }

    /// Attribute value; unset attributes read as `Null`
    pub fn get(&self, name: &str) -> Value {
        self.0
            .state
            .borrow()
            .attributes
            .get(name)
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        let mut state = self.0.state.borrow_mut();
        if let Some(dirty) = state.dirty.as_mut() {
            dirty.insert(name.to_string());
        }
        state.attributes.insert(name.to_string(), value);
    }

    /// Write without touching the dirty-attribute set (hydration)
    pub(crate) fn set_untracked(&self, name: &str, value: Value) {
        self.0
            .state
            .borrow_mut()
            .attributes
            .insert(name.to_string(), value);
    }

    /// Report `name` as changed without writing it
    pub(crate) fn mark_dirty(&self, name: &str) {
        if let Some(dirty) = self.0.state.borrow_mut().dirty.as_mut() {
            dirty.insert(name.to_string());
        }
    }

    pub fn is_dirtiness_tracked(&self) -> bool {
        self.0.state.borrow().dirty.is_some()
    }

    pub fn dirty_attributes(&self) -> Vec<String> {
        self.0
            .state
            .borrow()
            .dirty
            .as_ref()
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_dirty_attributes(&self) {
        if let Some(dirty) = self.0.state.borrow_mut().dirty.as_mut() {
            dirty.clear();
        }
    }

    pub fn same_instance(&self, other: &EntityRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for EntityRef {
    // Attributes are left out: they may point back at this instance.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRef")
            .field("entity", &self.0.entity_name)
            .field("id", &self.id())
            .field("instance", &self.0.instance_id)
            .finish()
    }
}

struct ProxyState {
    entity_name: String,
    root_entity_name: String,
    id: RefCell<Identifier>,
    target: RefCell<Option<EntityRef>>,
    associated: Cell<bool>,
}

/// Lazy reference to an instance that may not have been loaded
#[derive(Clone)]
pub struct ProxyRef(Rc<ProxyState>);

impl ProxyRef {
    pub fn new(
        entity_name: impl Into<String>,
        root_entity_name: impl Into<String>,
        id: Identifier,
    ) -> Self {
        ProxyRef(Rc::new(ProxyState {
            entity_name: entity_name.into(),
            root_entity_name: root_entity_name.into(),
            id: RefCell::new(id),
            target: RefCell::new(None),
            associated: Cell::new(false),
        }))
    }

    pub fn entity_name(&self) -> &str {
        &self.0.entity_name
    }

    pub fn root_entity_name(&self) -> &str {
        &self.0.root_entity_name
    }

    pub fn id(&self) -> Identifier {
        self.0.id.borrow().clone()
    }

    pub(crate) fn set_id(&self, id: Identifier) {
        *self.0.id.borrow_mut() = id;
    }

    pub fn is_initialized(&self) -> bool {
        self.0.target.borrow().is_some()
    }

    pub fn target(&self) -> Option<EntityRef> {
        self.0.target.borrow().clone()
    }

    pub fn initialize(&self, target: EntityRef) {
        *self.0.target.borrow_mut() = Some(target);
    }

    /// Whether a persistence context has registered this proxy
    pub fn is_associated(&self) -> bool {
        self.0.associated.get()
    }

    pub(crate) fn set_associated(&self, associated: bool) {
        self.0.associated.set(associated);
    }

    pub fn same_proxy(&self, other: &ProxyRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ProxyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRef")
            .field("entity", &self.0.entity_name)
            .field("id", &self.id())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Identity map of merged originals to their managed copies
#[derive(Debug, Default)]
pub struct MergeMap {
    copies: HashMap<InstanceId, EntityRef>,
}

impl MergeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, original: &EntityRef, copy: EntityRef) {
        self.copies.insert(original.instance_id(), copy);
    }

    pub fn copy_of(&self, original: &EntityRef) -> Option<EntityRef> {
        self.copies.get(&original.instance_id()).cloned()
    }

    /// Whether `entity` is one of the copies (rather than an original)
    pub fn is_copy(&self, entity: &EntityRef) -> bool {
        self.copies.values().any(|c| c.same_instance(entity))
    }

    pub fn len(&self) -> usize {
        self.copies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let a = EntityRef::new("Book");
        let b = a.clone();
        b.set("title", "T");
        assert_eq!(a.get("title"), Value::from("T"));
        assert!(a.same_instance(&b));
        assert_eq!(a.instance_id(), b.instance_id());
    }

    #[test]
    fn test_instance_ids_are_distinct() {
        let a = EntityRef::new("Book").with_id(1);
        let b = EntityRef::new("Book").with_id(1);
        assert_ne!(a.instance_id(), b.instance_id());
        assert!(!a.same_instance(&b));
    }

    #[test]
    fn test_dirty_tracking_only_when_enabled() {
        let plain = EntityRef::new("Book");
        plain.set("title", "x");
        assert!(plain.dirty_attributes().is_empty());

        let tracked = EntityRef::new("Book").tracking_dirtiness();
        tracked.set("title", "x");
        tracked.set("pages", 3);
        assert_eq!(tracked.dirty_attributes(), vec!["pages", "title"]);
        tracked.clear_dirty_attributes();
        assert!(tracked.dirty_attributes().is_empty());
        assert!(tracked.is_dirtiness_tracked());
    }

    #[test]
    fn test_debug_does_not_recurse_through_cycles() {
        let a = EntityRef::new("Node").with_id(1);
        let b = EntityRef::new("Node").with_id(2).with("next", &a);
        a.set("next", &b);
        let rendered = format!("{:?}", a);
        assert!(rendered.contains("Node"));
    }

    #[test]
    fn test_merge_map_is_identity_keyed() {
        let original = EntityRef::new("Book").with_id(1);
        let twin = EntityRef::new("Book").with_id(1);
        let copy = EntityRef::new("Book").with_id(1);
        let mut map = MergeMap::new();
        map.insert(&original, copy.clone());
        assert!(map.copy_of(&original).unwrap().same_instance(&copy));
        assert!(map.copy_of(&twin).is_none());
        assert!(map.is_copy(&copy));
    }

    #[test]
    fn test_proxy_initialization() {
        let proxy = ProxyRef::new("Author", "Author", Identifier::Long(5));
        assert!(!proxy.is_initialized());
        proxy.initialize(EntityRef::new("Author").with_id(5));
        assert!(proxy.is_initialized());
        assert_eq!(proxy.id(), Identifier::Long(5));
    }
}
