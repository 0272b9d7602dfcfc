use crate::model::descriptor::EntityDescriptor;
use crate::model::value::Identifier;
use std::fmt;

/// Primary index of the persistence context
///
/// Keys use the root entity name, so instances of different subclasses in
/// one hierarchy share a key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    entity_name: String,
    id: Identifier,
}

impl EntityKey {
    pub fn new(entity_name: impl Into<String>, id: Identifier) -> Self {
        Self {
            entity_name: entity_name.into(),
            id,
        }
    }

    pub fn for_descriptor(descriptor: &EntityDescriptor, id: Identifier) -> Self {
        Self::new(descriptor.root_entity_name(), id)
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_name, self.id)
    }
}
