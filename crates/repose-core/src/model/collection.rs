//! Collection-valued properties
//!
//! Users assign plain vectors of entities; the wrap visitor replaces them
//! with a [`PersistentCollection`] during save so that later additions are
//! observed by the session.

use crate::model::entity::EntityRef;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
pub enum CollectionValue {
    Raw(Vec<EntityRef>),
    Wrapped(PersistentCollection),
}

impl CollectionValue {
    pub fn elements(&self) -> Vec<EntityRef> {
        match self {
            CollectionValue::Raw(elements) => elements.clone(),
            CollectionValue::Wrapped(c) => c.elements(),
        }
    }

    pub fn is_wrapped(&self) -> bool {
        matches!(self, CollectionValue::Wrapped(_))
    }

    pub(crate) fn same_elements(&self, other: &CollectionValue) -> bool {
        if let (CollectionValue::Wrapped(a), CollectionValue::Wrapped(b)) = (self, other) {
            return a.same_collection(b);
        }
        let (a, b) = (self.elements(), other.elements());
        a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.same_instance(y))
    }
}

impl fmt::Debug for CollectionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionValue::Raw(elements) => write!(f, "Raw({} elements)", elements.len()),
            CollectionValue::Wrapped(c) => fmt::Debug::fmt(c, f),
        }
    }
}

struct CollectionState {
    role: String,
    elements: Vec<EntityRef>,
    dirty: bool,
}

/// Session-aware collection wrapper
#[derive(Clone)]
pub struct PersistentCollection(Rc<RefCell<CollectionState>>);

impl PersistentCollection {
    /// `role` is `<OwnerEntity>.<attribute>`
    pub fn new(role: impl Into<String>, elements: Vec<EntityRef>) -> Self {
        PersistentCollection(Rc::new(RefCell::new(CollectionState {
            role: role.into(),
            elements,
            dirty: false,
        })))
    }

    pub fn role(&self) -> String {
        self.0.borrow().role.clone()
    }

    pub fn elements(&self) -> Vec<EntityRef> {
        self.0.borrow().elements.clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().elements.is_empty()
    }

    pub fn push(&self, element: EntityRef) {
        let mut state = self.0.borrow_mut();
        state.elements.push(element);
        state.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.0.borrow().dirty
    }

    pub fn clear_dirty(&self) {
        self.0.borrow_mut().dirty = false;
    }

    pub fn same_collection(&self, other: &PersistentCollection) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for PersistentCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.borrow();
        f.debug_struct("PersistentCollection")
            .field("role", &state.role)
            .field("len", &state.elements.len())
            .field("dirty", &state.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_marks_dirty() {
        let c = PersistentCollection::new("Author.books", vec![]);
        assert!(!c.is_dirty());
        c.push(EntityRef::new("Book"));
        assert!(c.is_dirty());
        assert_eq!(c.len(), 1);
        c.clear_dirty();
        assert!(!c.is_dirty());
    }

    #[test]
    fn test_raw_and_wrapped_compare_by_element_identity() {
        let book = EntityRef::new("Book");
        let raw = CollectionValue::Raw(vec![book.clone()]);
        let wrapped =
            CollectionValue::Wrapped(PersistentCollection::new("Author.books", vec![book]));
        assert!(raw.same_elements(&wrapped));
        assert!(wrapped.is_wrapped());
    }
}
