//! Seed parser with validation
//!
//! Parses YAML, builds the mapping registry the document declares, and
//! checks the object graph against it: known entities, unique labels,
//! identifiers present exactly when assigned, attribute values of the
//! mapped types, and association labels that resolve to a compatible
//! object.

use crate::errors::{io_error, pipeline, seed_validation, Result};
use crate::seed::format::{
    SeedAttribute, SeedAttributeType, SeedDocument, SeedEntity, SeedIdStrategy, SeedObject,
    SeedVersionType, SEED_SCHEMA_VERSION,
};
use chrono::{DateTime, Utc};
use repose_core::metamodel::MappingRegistry;
use repose_core::model::{
    AttributeMapping, CascadeStyle, EntityDescriptor, IdStrategy, Identifier, TypeHandler, Value,
    VersionType,
};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use uuid::Uuid;

pub fn parse_seed_file(path: &Path) -> Result<SeedDocument> {
    let content = fs::read_to_string(path).map_err(|e| io_error("seed_read", e))?;
    parse_seed_str(&content)
}

pub fn parse_seed_str(content: &str) -> Result<SeedDocument> {
    let document: SeedDocument = serde_yaml::from_str(content)
        .map_err(|e| seed_validation(&format!("YAML parse error: {}", e)))?;

    let registry = build_registry(&document)?;
    validate_objects(&document, &registry)?;

    Ok(document)
}

/// Build the registry declared by the document's `entities` section.
/// A parent must be declared before the entities that extend it.
pub fn build_registry(document: &SeedDocument) -> Result<MappingRegistry> {
    if document.schema_version != SEED_SCHEMA_VERSION {
        return Err(seed_validation(&format!(
            "Unsupported schema_version: {}. Expected {}",
            document.schema_version, SEED_SCHEMA_VERSION
        )));
    }

    let mut built: HashMap<&str, EntityDescriptor> = HashMap::new();
    let mut registry = MappingRegistry::new();
    for entity in &document.entities {
        if built.contains_key(entity.name.as_str()) {
            return Err(seed_validation(&format!(
                "Entity {} is declared twice",
                entity.name
            )));
        }
        let descriptor = build_descriptor(entity, &built)?;
        registry
            .register(descriptor.clone())
            .map_err(pipeline("seed_parse"))?;
        built.insert(entity.name.as_str(), descriptor);
    }
    registry.validate().map_err(pipeline("seed_parse"))?;

    Ok(registry)
}

fn build_descriptor(
    entity: &SeedEntity,
    built: &HashMap<&str, EntityDescriptor>,
) -> Result<EntityDescriptor> {
    let mut builder = match (&entity.extends, &entity.id) {
        (Some(parent), None) => {
            let parent = built.get(parent.as_str()).ok_or_else(|| {
                seed_validation(&format!(
                    "Entity {} extends {}, which is not declared before it",
                    entity.name, parent
                ))
            })?;
            EntityDescriptor::subclass(parent, entity.name.as_str(), entity.table.as_str())
        }
        (Some(_), Some(_)) => {
            return Err(seed_validation(&format!(
                "Entity {} inherits its identifier and cannot declare one",
                entity.name
            )))
        }
        (None, None) => {
            return Err(seed_validation(&format!(
                "Entity {} has no identifier",
                entity.name
            )))
        }
        (None, Some(id)) => {
            let generator = id.generator.clone();
            let strategy = match id.strategy {
                SeedIdStrategy::Assigned => IdStrategy::Assigned,
                SeedIdStrategy::Identity => IdStrategy::Identity,
                SeedIdStrategy::Uuid => IdStrategy::Uuid,
                SeedIdStrategy::Sequence => IdStrategy::Sequence {
                    name: generator.unwrap_or_else(|| format!("{}_seq", entity.table)),
                },
                SeedIdStrategy::Table => IdStrategy::Table {
                    segment: generator.unwrap_or_else(|| entity.table.clone()),
                },
            };
            EntityDescriptor::builder(entity.name.as_str(), entity.table.as_str()).id(
                id.name.as_str(),
                id.column.clone().unwrap_or_else(|| id.name.clone()),
                id.id_type,
                strategy,
            )
        }
    };

    for attribute in &entity.attributes {
        builder = builder.attribute(attribute_mapping(&entity.name, attribute)?);
    }
    if let Some(version) = &entity.version {
        let version_type = match version.version_type {
            SeedVersionType::Counter => VersionType::Counter,
            SeedVersionType::Timestamp => VersionType::Timestamp,
        };
        builder = builder.version(version.attribute.as_str(), version_type);
    }

    builder.build().map_err(pipeline("seed_parse"))
}

fn attribute_mapping(entity_name: &str, attribute: &SeedAttribute) -> Result<AttributeMapping> {
    let name = attribute.name.as_str();
    let target = match (attribute.kind.is_association(), &attribute.target) {
        (true, Some(target)) => target.as_str(),
        (true, None) => {
            return Err(seed_validation(&format!(
                "Association {}.{} has no target",
                entity_name, name
            )))
        }
        (false, Some(_)) => {
            return Err(seed_validation(&format!(
                "Basic attribute {}.{} cannot have a target",
                entity_name, name
            )))
        }
        (false, None) => "",
    };

    let mut mapping = match attribute.kind {
        SeedAttributeType::Boolean => AttributeMapping::basic(name, TypeHandler::Boolean),
        SeedAttributeType::Integer => AttributeMapping::basic(name, TypeHandler::Integer),
        SeedAttributeType::Real => AttributeMapping::basic(name, TypeHandler::Real),
        SeedAttributeType::Text => AttributeMapping::basic(name, TypeHandler::Text),
        SeedAttributeType::Uuid => AttributeMapping::basic(name, TypeHandler::Uuid),
        SeedAttributeType::Timestamp => AttributeMapping::basic(name, TypeHandler::Timestamp),
        SeedAttributeType::ManyToOne => AttributeMapping::many_to_one(name, target),
        SeedAttributeType::OneToOne => AttributeMapping::one_to_one(name, target),
        SeedAttributeType::OneToMany => AttributeMapping::one_to_many(name, target),
    };

    if let Some(column) = &attribute.column {
        mapping = mapping.column(column.as_str());
    }
    if !attribute.nullable {
        mapping = mapping.not_null();
    }
    if !attribute.updatable {
        mapping = mapping.read_only();
    }
    if !attribute.insertable {
        mapping = mapping.not_insertable();
    }
    if let Some(cascade) = &attribute.cascade {
        let style: CascadeStyle = cascade.parse().map_err(pipeline("seed_parse"))?;
        mapping = mapping.cascade(style);
    }

    Ok(mapping)
}

pub(crate) fn validate_objects(document: &SeedDocument, registry: &MappingRegistry) -> Result<()> {
    let mut labels: HashMap<&str, &str> = HashMap::new();
    for object in &document.objects {
        if !registry.contains(&object.entity) {
            return Err(seed_validation(&format!(
                "Object of unknown entity {}",
                object.entity
            )));
        }
        if let Some(label) = &object.label {
            if labels.insert(label.as_str(), object.entity.as_str()).is_some() {
                return Err(seed_validation(&format!("Duplicate ref '{}'", label)));
            }
        }
    }

    for object in &document.objects {
        let descriptor = registry
            .get(&object.entity)
            .map_err(pipeline("seed_parse"))?;
        object_id(&descriptor, object)?;

        let declared: HashSet<&str> = descriptor.property_names().into_iter().collect();
        for (name, raw) in &object.values {
            if !declared.contains(name.as_str()) {
                return Err(seed_validation(&format!(
                    "{} has no attribute '{}'",
                    object.entity, name
                )));
            }
            let Some(index) = descriptor.attribute_index(name) else {
                continue;
            };
            let handler = &descriptor.attributes()[index].handler;
            match handler.associated_entity() {
                None => {
                    scalar_value(handler, name, raw)?;
                }
                Some(target) => {
                    for label in association_labels(handler, name, raw)? {
                        let referenced = labels.get(label).ok_or_else(|| {
                            seed_validation(&format!(
                                "{}.{} references unknown ref '{}'",
                                object.entity, name, label
                            ))
                        })?;
                        if !registry.is_subclass_of(referenced, target) {
                            return Err(seed_validation(&format!(
                                "{}.{} expects {} but '{}' is a {}",
                                object.entity, name, target, label, referenced
                            )));
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// The object's identifier, `None` when the strategy generates one
pub(crate) fn object_id(
    descriptor: &EntityDescriptor,
    object: &SeedObject,
) -> Result<Option<Identifier>> {
    let assigned = matches!(descriptor.id_strategy(), IdStrategy::Assigned);
    let raw = match (&object.id, assigned) {
        (None, false) => return Ok(None),
        (Some(raw), true) => raw,
        (None, true) => {
            return Err(seed_validation(&format!(
                "Object of {} needs an id",
                object.entity
            )))
        }
        (Some(_), false) => {
            return Err(seed_validation(&format!(
                "Object of {} cannot set a generated id",
                object.entity
            )))
        }
    };

    let raw = match raw {
        serde_yaml::Value::Number(n) => match n.as_i64() {
            Some(v) => Identifier::Long(v),
            None => Identifier::Text(n.to_string()),
        },
        serde_yaml::Value::String(s) => Identifier::Text(s.clone()),
        other => {
            return Err(seed_validation(&format!(
                "Object of {} has an invalid id: {:?}",
                object.entity, other
            )))
        }
    };
    descriptor
        .id_type()
        .coerce(&raw)
        .map(Some)
        .map_err(pipeline("seed_parse"))
}

/// Labels named by an association value: one (or none) for a to-one
/// reference, a list for a collection
pub(crate) fn association_labels<'a>(
    handler: &TypeHandler,
    attribute: &str,
    raw: &'a serde_yaml::Value,
) -> Result<Vec<&'a str>> {
    let label = |value: &'a serde_yaml::Value| {
        value.as_str().ok_or_else(|| {
            seed_validation(&format!(
                "{} must name objects by ref, found {:?}",
                attribute, value
            ))
        })
    };
    match (handler.is_collection_type(), raw) {
        (_, serde_yaml::Value::Null) => Ok(Vec::new()),
        (true, serde_yaml::Value::Sequence(items)) => items.iter().map(label).collect(),
        (true, other) => Err(seed_validation(&format!(
            "{} must be a list of refs, found {:?}",
            attribute, other
        ))),
        (false, value) => Ok(vec![label(value)?]),
    }
}

/// Convert a YAML scalar to the attribute's runtime value
pub(crate) fn scalar_value(
    handler: &TypeHandler,
    attribute: &str,
    raw: &serde_yaml::Value,
) -> Result<Value> {
    use serde_yaml::Value as Yaml;

    let converted = match (handler, raw) {
        (_, Yaml::Null) => Some(Value::Null),
        (TypeHandler::Boolean, Yaml::Bool(v)) => Some(Value::Boolean(*v)),
        (TypeHandler::Integer, Yaml::Number(n)) => n.as_i64().map(Value::Integer),
        (TypeHandler::Real, Yaml::Number(n)) => n.as_f64().map(Value::Real),
        (TypeHandler::Text, Yaml::String(s)) => Some(Value::Text(s.clone())),
        (TypeHandler::Text, Yaml::Number(n)) => Some(Value::Text(n.to_string())),
        (TypeHandler::Text, Yaml::Bool(v)) => Some(Value::Text(v.to_string())),
        (TypeHandler::Uuid, Yaml::String(s)) => Uuid::parse_str(s).ok().map(Value::Uuid),
        (TypeHandler::Timestamp, Yaml::String(s)) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| Value::Timestamp(t.with_timezone(&Utc))),
        _ => None,
    };

    converted.ok_or_else(|| {
        seed_validation(&format!(
            "{} expects {}, found {:?}",
            attribute, handler, raw
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
schema_version: 1
entities:
  - name: Tag
    table: tags
    id: { type: text }
    attributes:
      - { name: label, type: text, nullable: false }
objects:
  - { entity: Tag, id: rust, values: { label: Rust } }
"#;

    #[test]
    fn test_parse_minimal_seed() {
        let document = parse_seed_str(MINIMAL).unwrap();
        assert_eq!(document.entities.len(), 1);
        assert_eq!(document.objects.len(), 1);

        let registry = build_registry(&document).unwrap();
        let tag = registry.get("Tag").unwrap();
        assert_eq!(tag.property_names(), vec!["label"]);
        assert!(!tag.attributes()[0].nullable);
    }

    #[test]
    fn test_unsupported_schema_version() {
        let err = parse_seed_str(&MINIMAL.replace("schema_version: 1", "schema_version: 9"))
            .unwrap_err();
        assert!(err.message().contains("schema_version"));
    }

    #[test]
    fn test_unknown_attribute_is_rejected() {
        let err = parse_seed_str(&MINIMAL.replace("label: Rust", "colour: red")).unwrap_err();
        assert_eq!(err.code(), "ERR_INVALID_INPUT");
    }

    #[test]
    fn test_assigned_id_is_required() {
        let err = parse_seed_str(&MINIMAL.replace("id: rust, ", "")).unwrap_err();
        assert!(err.message().contains("needs an id"));
    }

    #[test]
    fn test_scalar_conversion() {
        let timestamp = scalar_value(
            &TypeHandler::Timestamp,
            "created",
            &serde_yaml::Value::String("2024-03-01T10:00:00Z".to_string()),
        )
        .unwrap();
        assert!(matches!(timestamp, Value::Timestamp(_)));

        let err = scalar_value(
            &TypeHandler::Integer,
            "pages",
            &serde_yaml::Value::String("many".to_string()),
        )
        .unwrap_err();
        assert!(err.message().contains("pages"));
    }
}
