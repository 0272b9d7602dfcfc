//! Typed per-entry extension values, stored beside the entries

use crate::engine::entry::EntrySerial;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Default)]
pub struct ExtraStates {
    by_entry: HashMap<EntrySerial, HashMap<TypeId, Rc<dyn Any>>>,
}

impl ExtraStates {
    pub fn insert<T: Any>(&mut self, entry: EntrySerial, value: T) {
        self.by_entry
            .entry(entry)
            .or_default()
            .insert(TypeId::of::<T>(), Rc::new(value));
    }

    pub fn get<T: Any>(&self, entry: EntrySerial) -> Option<Rc<T>> {
        self.by_entry
            .get(&entry)
            .and_then(|states| states.get(&TypeId::of::<T>()))
            .and_then(|state| Rc::clone(state).downcast::<T>().ok())
    }

    /// Copy every state `from` has and `to` lacks
    pub fn copy_missing(&mut self, from: EntrySerial, to: EntrySerial) {
        if from == to {
            return;
        }
        let Some(source) = self.by_entry.get(&from).cloned() else {
            return;
        };
        let target = self.by_entry.entry(to).or_default();
        for (type_id, state) in source {
            target.entry(type_id).or_insert(state);
        }
    }

    pub fn remove(&mut self, entry: EntrySerial) {
        self.by_entry.remove(&entry);
    }

    pub fn clear(&mut self) {
        self.by_entry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Audit(&'static str);

    #[derive(Debug, PartialEq)]
    struct Tag(u32);

    #[test]
    fn test_typed_lookup() {
        let mut states = ExtraStates::default();
        states.insert(EntrySerial(1), Audit("created"));
        assert_eq!(*states.get::<Audit>(EntrySerial(1)).unwrap(), Audit("created"));
        assert!(states.get::<Tag>(EntrySerial(1)).is_none());
        assert!(states.get::<Audit>(EntrySerial(2)).is_none());
    }

    #[test]
    fn test_copy_missing_keeps_existing() {
        let mut states = ExtraStates::default();
        states.insert(EntrySerial(1), Audit("old"));
        states.insert(EntrySerial(1), Tag(7));
        states.insert(EntrySerial(2), Audit("new"));

        states.copy_missing(EntrySerial(1), EntrySerial(2));

        assert_eq!(*states.get::<Audit>(EntrySerial(2)).unwrap(), Audit("new"));
        assert_eq!(*states.get::<Tag>(EntrySerial(2)).unwrap(), Tag(7));
    }
}
