//! Registry of entity descriptors

use crate::errors::{ReposeError, Result};
use crate::model::descriptor::EntityDescriptor;
use crate::model::entity::EntityRef;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct MappingRegistry {
    descriptors: BTreeMap<String, Arc<EntityDescriptor>>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: EntityDescriptor) -> Result<()> {
        let name = descriptor.entity_name().to_string();
        if self.descriptors.contains_key(&name) {
            return Err(ReposeError::InvalidMapping {
                entity_name: name,
                message: "entity registered twice".to_string(),
            });
        }
        self.descriptors.insert(name, Arc::new(descriptor));
        Ok(())
    }

    pub fn get(&self, entity_name: &str) -> Result<Arc<EntityDescriptor>> {
        self.descriptors
            .get(entity_name)
            .cloned()
            .ok_or_else(|| ReposeError::UnknownEntity {
                entity_name: entity_name.to_string(),
            })
    }

    pub fn contains(&self, entity_name: &str) -> bool {
        self.descriptors.contains_key(entity_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Whether `entity_name` is `ancestor` or one of its subclasses
    pub fn is_subclass_of(&self, entity_name: &str, ancestor: &str) -> bool {
        let mut current = Some(entity_name.to_string());
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self
                .descriptors
                .get(&name)
                .and_then(|d| d.super_entity().map(str::to_string));
        }
        false
    }

    /// Descriptor for `instance` when handled as `entity_name`. Under
    /// inheritance the instance's concrete descriptor wins.
    pub fn resolve(&self, entity_name: &str, instance: &EntityRef) -> Result<Arc<EntityDescriptor>> {
        let concrete = instance.entity_name();
        if concrete == entity_name {
            return self.get(entity_name);
        }
        if self.contains(concrete) && self.is_subclass_of(concrete, entity_name) {
            return self.get(concrete);
        }
        if !self.contains(entity_name) {
            return Err(ReposeError::UnknownEntity {
                entity_name: entity_name.to_string(),
            });
        }
        Err(ReposeError::WrongEntityType {
            expected: entity_name.to_string(),
            actual: concrete.to_string(),
        })
    }

    /// Check that every association target and super entity is registered
    pub fn validate(&self) -> Result<()> {
        for descriptor in self.descriptors.values() {
            if let Some(parent) = descriptor.super_entity() {
                if !self.contains(parent) {
                    return Err(ReposeError::InvalidMapping {
                        entity_name: descriptor.entity_name().to_string(),
                        message: format!("super entity '{}' is not registered", parent),
                    });
                }
            }
            for attribute in descriptor.attributes() {
                if let Some(target) = attribute.handler.associated_entity() {
                    if !self.contains(target) {
                        return Err(ReposeError::InvalidMapping {
                            entity_name: descriptor.entity_name().to_string(),
                            message: format!(
                                "attribute '{}' targets unknown entity '{}'",
                                attribute.name, target
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
