//! Entity descriptors: the read-only mapping of one entity type
//!
//! Descriptors are immutable after [`EntityDescriptorBuilder::build`] and are
//! shared across sessions behind an `Arc`.

use crate::errors::{ReposeError, Result};
use crate::model::cascade_style::CascadeStyle;
use crate::model::collection::CollectionValue;
use crate::model::entity::{EntityRef, MergeMap, ProxyRef};
use crate::model::types::TypeHandler;
use crate::model::value::{IdType, Identifier, Value};
use std::collections::HashSet;

/// How identifiers are produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdStrategy {
    /// The application sets the id before saving
    Assigned,
    /// The database produces the id as a side effect of the insert
    Identity,
    /// Next value of a named database sequence
    Sequence { name: String },
    /// Hi-value row in the shared id table, keyed by segment
    Table { segment: String },
    /// Random v4 UUID
    Uuid,
}

#[derive(Debug, Clone)]
pub struct IdentifierMapping {
    pub name: String,
    pub column: String,
    pub id_type: IdType,
    pub strategy: IdStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionType {
    Counter,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionMapping {
    /// Index into the attribute list
    pub attribute: usize,
    pub version_type: VersionType,
}

#[derive(Debug, Clone)]
pub struct AttributeMapping {
    pub name: String,
    /// `None` for collections, which have no column on the owner's table
    pub column: Option<String>,
    pub handler: TypeHandler,
    pub insertable: bool,
    pub updatable: bool,
    pub nullable: bool,
    pub cascade: CascadeStyle,
}

impl AttributeMapping {
    pub fn basic(name: impl Into<String>, handler: TypeHandler) -> Self {
        let name = name.into();
        Self {
            column: Some(name.clone()),
            name,
            handler,
            insertable: true,
            updatable: true,
            nullable: true,
            cascade: CascadeStyle::NONE,
        }
    }

    /// Foreign key column `<name>_id`
    pub fn many_to_one(name: impl Into<String>, entity: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            column: Some(format!("{}_id", name)),
            handler: TypeHandler::ManyToOne {
                entity: entity.into(),
            },
            ..Self::basic(name, TypeHandler::Integer)
        }
    }

    pub fn one_to_one(name: impl Into<String>, entity: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            column: Some(format!("{}_id", name)),
            handler: TypeHandler::OneToOne {
                entity: entity.into(),
            },
            ..Self::basic(name, TypeHandler::Integer)
        }
    }

    pub fn one_to_many(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            column: None,
            handler: TypeHandler::OneToMany {
                entity: entity.into(),
            },
            ..Self::basic(name, TypeHandler::Integer)
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        if self.column.is_some() {
            self.column = Some(column.into());
        }
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Written on insert, never on update
    pub fn read_only(mut self) -> Self {
        self.updatable = false;
        self
    }

    pub fn not_insertable(mut self) -> Self {
        self.insertable = false;
        self
    }

    pub fn cascade(mut self, style: CascadeStyle) -> Self {
        self.cascade = style;
        self
    }
}

#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    entity_name: String,
    root_entity_name: String,
    super_entity: Option<String>,
    table: String,
    identifier: IdentifierMapping,
    attributes: Vec<AttributeMapping>,
    version: Option<VersionMapping>,
}

impl EntityDescriptor {
    pub fn builder(entity_name: impl Into<String>, table: impl Into<String>) -> EntityDescriptorBuilder {
        let entity_name = entity_name.into();
        EntityDescriptorBuilder {
            root_entity_name: entity_name.clone(),
            entity_name,
            super_entity: None,
            table: table.into(),
            identifier: None,
            attributes: Vec::new(),
            version: None,
        }
    }

    /// Start a subclass descriptor. The subclass inherits the identifier,
    /// attributes and version of `parent` and shares its key space; its rows
    /// live in `table`.
    pub fn subclass(
        parent: &EntityDescriptor,
        entity_name: impl Into<String>,
        table: impl Into<String>,
    ) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            entity_name: entity_name.into(),
            root_entity_name: parent.root_entity_name.clone(),
            super_entity: Some(parent.entity_name.clone()),
            table: table.into(),
            identifier: Some(parent.identifier.clone()),
            attributes: parent.attributes.clone(),
            version: parent
                .version
                .map(|v| (parent.attributes[v.attribute].name.clone(), v.version_type)),
        }
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Name used in entity keys; shared by a whole hierarchy
    pub fn root_entity_name(&self) -> &str {
        &self.root_entity_name
    }

    pub fn super_entity(&self) -> Option<&str> {
        self.super_entity.as_deref()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn identifier(&self) -> &IdentifierMapping {
        &self.identifier
    }

    pub fn id_type(&self) -> IdType {
        self.identifier.id_type
    }

    pub fn id_strategy(&self) -> &IdStrategy {
        &self.identifier.strategy
    }

    pub fn attributes(&self) -> &[AttributeMapping] {
        &self.attributes
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn property_names(&self) -> Vec<&str> {
        self.attributes.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn property_types(&self) -> Vec<&TypeHandler> {
        self.attributes.iter().map(|a| &a.handler).collect()
    }

    pub fn property_updatability(&self) -> Vec<bool> {
        self.attributes.iter().map(|a| a.updatable).collect()
    }

    pub fn property_insertability(&self) -> Vec<bool> {
        self.attributes.iter().map(|a| a.insertable).collect()
    }

    pub fn property_nullability(&self) -> Vec<bool> {
        self.attributes.iter().map(|a| a.nullable).collect()
    }

    pub fn is_versioned(&self) -> bool {
        self.version.is_some()
    }

    /// Attribute index of the version property
    pub fn version_property(&self) -> Option<usize> {
        self.version.map(|v| v.attribute)
    }

    pub fn version_type(&self) -> Option<VersionType> {
        self.version.map(|v| v.version_type)
    }

    pub fn has_collections(&self) -> bool {
        self.attributes.iter().any(|a| a.handler.is_collection_type())
    }

    pub fn is_identifier_assigned_by_insert(&self) -> bool {
        self.identifier.strategy == IdStrategy::Identity
    }

    pub fn get_identifier(&self, entity: &EntityRef) -> Option<Identifier> {
        entity.id()
    }

    pub fn set_identifier(&self, entity: &EntityRef, id: Option<Identifier>) {
        entity.set_id(id);
    }

    pub fn get_property_values(&self, entity: &EntityRef) -> Vec<Value> {
        self.attributes.iter().map(|a| entity.get(&a.name)).collect()
    }

    /// Values to insert, in attribute order. During merge, references to
    /// originals that already have a managed copy are replaced by the copy.
    pub fn get_property_values_to_insert(
        &self,
        entity: &EntityRef,
        merge_map: Option<&MergeMap>,
    ) -> Vec<Value> {
        let values = self.get_property_values(entity);
        match merge_map {
            None => values,
            Some(map) => values
                .into_iter()
                .map(|value| substitute_merge_copies(value, map))
                .collect(),
        }
    }

    pub fn set_property_values(&self, entity: &EntityRef, values: &[Value]) {
        for (attribute, value) in self.attributes.iter().zip(values) {
            entity.set(&attribute.name, value.clone());
        }
    }

    /// Populate without marking attributes dirty (loading, refresh)
    pub(crate) fn hydrate(&self, entity: &EntityRef, values: &[Value]) {
        for (attribute, value) in self.attributes.iter().zip(values) {
            entity.set_untracked(&attribute.name, value.clone());
        }
    }

    pub fn instantiate(&self, id: Option<Identifier>) -> EntityRef {
        let entity = EntityRef::new(self.entity_name.clone());
        entity.set_id(id);
        entity
    }

    pub fn create_proxy(&self, id: Identifier) -> ProxyRef {
        ProxyRef::new(self.entity_name.clone(), self.root_entity_name.clone(), id)
    }
}

fn substitute_merge_copies(value: Value, map: &MergeMap) -> Value {
    match value {
        Value::Entity(e) => Value::Entity(map.copy_of(&e).unwrap_or(e)),
        Value::Collection(c) => Value::Collection(CollectionValue::Raw(
            c.elements()
                .into_iter()
                .map(|e| map.copy_of(&e).unwrap_or(e))
                .collect(),
        )),
        other => other,
    }
}

pub struct EntityDescriptorBuilder {
    entity_name: String,
    root_entity_name: String,
    super_entity: Option<String>,
    table: String,
    identifier: Option<IdentifierMapping>,
    attributes: Vec<AttributeMapping>,
    version: Option<(String, VersionType)>,
}

impl EntityDescriptorBuilder {
    pub fn id(
        mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        id_type: IdType,
        strategy: IdStrategy,
    ) -> Self {
        self.identifier = Some(IdentifierMapping {
            name: name.into(),
            column: column.into(),
            id_type,
            strategy,
        });
        self
    }

    pub fn attribute(mut self, attribute: AttributeMapping) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Mark an already declared attribute as the version property
    pub fn version(mut self, attribute: impl Into<String>, version_type: VersionType) -> Self {
        self.version = Some((attribute.into(), version_type));
        self
    }

    pub fn build(self) -> Result<EntityDescriptor> {
        let invalid = |message: String| ReposeError::InvalidMapping {
            entity_name: self.entity_name.clone(),
            message,
        };

        let identifier = self
            .identifier
            .clone()
            .ok_or_else(|| invalid("no identifier mapping".to_string()))?;

        let mut names = HashSet::new();
        let mut columns = HashSet::from([identifier.column.clone()]);
        for attribute in &self.attributes {
            if !names.insert(attribute.name.as_str()) {
                return Err(invalid(format!("duplicate attribute '{}'", attribute.name)));
            }
            if let Some(column) = &attribute.column {
                if !columns.insert(column.clone()) {
                    return Err(invalid(format!("duplicate column '{}'", column)));
                }
            }
        }

        let version = match &self.version {
            None => None,
            Some((name, version_type)) => {
                let index = self
                    .attributes
                    .iter()
                    .position(|a| &a.name == name)
                    .ok_or_else(|| invalid(format!("version attribute '{}' is not declared", name)))?;
                let expected = match version_type {
                    VersionType::Counter => TypeHandler::Integer,
                    VersionType::Timestamp => TypeHandler::Timestamp,
                };
                if self.attributes[index].handler != expected {
                    return Err(invalid(format!(
                        "version attribute '{}' must be {}",
                        name, expected
                    )));
                }
                Some(VersionMapping {
                    attribute: index,
                    version_type: *version_type,
                })
            }
        };

        Ok(EntityDescriptor {
            entity_name: self.entity_name,
            root_entity_name: self.root_entity_name,
            super_entity: self.super_entity,
            table: self.table,
            identifier,
            attributes: self.attributes,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> EntityDescriptor {
        EntityDescriptor::builder("Book", "books")
            .id("id", "id", IdType::Long, IdStrategy::Assigned)
            .attribute(AttributeMapping::basic("title", TypeHandler::Text))
            .attribute(AttributeMapping::many_to_one("author", "Author").cascade(CascadeStyle::PERSIST))
            .attribute(AttributeMapping::basic("version", TypeHandler::Integer))
            .version("version", VersionType::Counter)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_resolves_version_index() {
        let d = book();
        assert!(d.is_versioned());
        assert_eq!(d.version_property(), Some(2));
        assert_eq!(d.property_names(), vec!["title", "author", "version"]);
        assert_eq!(d.attributes()[1].column.as_deref(), Some("author_id"));
    }

    #[test]
    fn test_version_must_be_declared() {
        let err = EntityDescriptor::builder("Book", "books")
            .id("id", "id", IdType::Long, IdStrategy::Assigned)
            .version("version", VersionType::Counter)
            .build()
            .unwrap_err();
        assert!(matches!(err, ReposeError::InvalidMapping { .. }));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let err = EntityDescriptor::builder("Book", "books")
            .id("id", "id", IdType::Long, IdStrategy::Assigned)
            .attribute(AttributeMapping::basic("title", TypeHandler::Text))
            .attribute(AttributeMapping::basic("name", TypeHandler::Text).column("title"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ReposeError::InvalidMapping { .. }));
    }

    #[test]
    fn test_subclass_shares_root() {
        let parent = book();
        let child = EntityDescriptor::subclass(&parent, "Novel", "novels")
            .attribute(AttributeMapping::basic("genre", TypeHandler::Text))
            .build()
            .unwrap();
        assert_eq!(child.root_entity_name(), "Book");
        assert_eq!(child.super_entity(), Some("Book"));
        assert_eq!(child.version_property(), Some(2));
        assert_eq!(child.attributes().len(), 4);
    }

    #[test]
    fn test_values_to_insert_substitute_merge_copies() {
        let d = book();
        let original_author = EntityRef::new("Author").with_id(1);
        let managed_author = EntityRef::new("Author").with_id(1);
        let entity = EntityRef::new("Book")
            .with("title", "T")
            .with("author", &original_author);
        let mut map = MergeMap::new();
        map.insert(&original_author, managed_author.clone());

        let values = d.get_property_values_to_insert(&entity, Some(&map));
        assert!(values[1].as_entity().unwrap().same_instance(&managed_author));

        let plain = d.get_property_values_to_insert(&entity, None);
        assert!(plain[1].as_entity().unwrap().same_instance(&original_author));
    }
}
