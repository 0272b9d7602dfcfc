//! Per-attribute type handlers
//!
//! A handler knows how to copy, bind, read and compare one attribute's
//! values. Association handlers bind the referenced instance's identifier;
//! the identifier is resolved when the statement is bound, not when the
//! action is queued, so ids produced by earlier identity inserts are seen
//! by later foreign-key writes.

use crate::engine::persistence_context::PersistenceContext;
use crate::errors::{ReposeError, Result};
use crate::model::collection::CollectionValue;
use crate::model::value::{Identifier, SqlValue, Value};
use crate::sql::dialect::ColumnType;
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeHandler {
    Boolean,
    Integer,
    Real,
    Text,
    Uuid,
    Timestamp,
    ManyToOne { entity: String },
    OneToOne { entity: String },
    /// Inverse collection; the foreign key lives on the element side
    OneToMany { entity: String },
}

impl TypeHandler {
    /// Many-to-one or one-to-one
    pub fn is_entity_type(&self) -> bool {
        matches!(
            self,
            TypeHandler::ManyToOne { .. } | TypeHandler::OneToOne { .. }
        )
    }

    pub fn is_collection_type(&self) -> bool {
        matches!(self, TypeHandler::OneToMany { .. })
    }

    pub fn is_association(&self) -> bool {
        self.is_entity_type() || self.is_collection_type()
    }

    pub fn associated_entity(&self) -> Option<&str> {
        match self {
            TypeHandler::ManyToOne { entity }
            | TypeHandler::OneToOne { entity }
            | TypeHandler::OneToMany { entity } => Some(entity),
            _ => None,
        }
    }

    /// Column type for basic attributes; associations depend on the
    /// target's identifier type and are resolved by the caller
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            TypeHandler::Boolean => Some(ColumnType::Boolean),
            TypeHandler::Integer => Some(ColumnType::Integer),
            TypeHandler::Real => Some(ColumnType::Real),
            TypeHandler::Text => Some(ColumnType::Text),
            TypeHandler::Uuid => Some(ColumnType::Uuid),
            TypeHandler::Timestamp => Some(ColumnType::Timestamp),
            _ => None,
        }
    }

    /// Copy a value so that later mutation of the entity does not leak into
    /// a queued action. Entity references keep their identity; wrapped
    /// collections are copied element-wise.
    pub fn deep_copy(&self, value: &Value) -> Value {
        match value {
            Value::Collection(CollectionValue::Wrapped(c)) => {
                Value::Collection(CollectionValue::Raw(c.elements()))
            }
            other => other.clone(),
        }
    }

    /// Convert a property value to a statement parameter
    pub fn bind(&self, attribute: &str, value: &Value, pc: &PersistenceContext) -> Result<SqlValue> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        match (self, value) {
            (TypeHandler::Boolean, Value::Boolean(v)) => Ok(SqlValue::Integer(i64::from(*v))),
            (TypeHandler::Integer, Value::Integer(v)) => Ok(SqlValue::Integer(*v)),
            (TypeHandler::Real, Value::Real(v)) => Ok(SqlValue::Real(*v)),
            (TypeHandler::Real, Value::Integer(v)) => Ok(SqlValue::Real(*v as f64)),
            (TypeHandler::Text, Value::Text(v)) => Ok(SqlValue::Text(v.clone())),
            (TypeHandler::Uuid, Value::Uuid(v)) => Ok(SqlValue::Text(v.hyphenated().to_string())),
            (TypeHandler::Timestamp, Value::Timestamp(v)) => Ok(SqlValue::Text(format_timestamp(v))),
            (TypeHandler::ManyToOne { entity } | TypeHandler::OneToOne { entity }, _) => {
                let id = referenced_id(attribute, entity, value, pc)?;
                Ok(match id {
                    Identifier::Long(v) => SqlValue::Integer(v),
                    Identifier::Text(v) => SqlValue::Text(v),
                    Identifier::Uuid(v) => SqlValue::Text(v.hyphenated().to_string()),
                })
            }
            (TypeHandler::OneToMany { .. }, _) => Err(ReposeError::Internal {
                message: format!("collection attribute {} has no column to bind", attribute),
            }),
            _ => Err(self.mismatch(attribute, value.type_name())),
        }
    }

    /// Convert a column value to a property value. Associations read as the
    /// referenced identifier, collections as the collection key.
    pub fn read(&self, attribute: &str, value: &SqlValue) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let found = value.type_name();
        match (self, value) {
            (TypeHandler::Boolean, SqlValue::Integer(v)) => Ok(Value::Boolean(*v != 0)),
            (TypeHandler::Integer, SqlValue::Integer(v)) => Ok(Value::Integer(*v)),
            (TypeHandler::Real, SqlValue::Real(v)) => Ok(Value::Real(*v)),
            (TypeHandler::Real, SqlValue::Integer(v)) => Ok(Value::Real(*v as f64)),
            (TypeHandler::Text, SqlValue::Text(v)) => Ok(Value::Text(v.clone())),
            (TypeHandler::Uuid, SqlValue::Text(v)) => Uuid::parse_str(v)
                .map(Value::Uuid)
                .map_err(|_| self.mismatch(attribute, found)),
            (TypeHandler::Timestamp, SqlValue::Text(v)) => DateTime::parse_from_rfc3339(v)
                .map(|t| Value::Timestamp(t.with_timezone(&Utc)))
                .map_err(|_| self.mismatch(attribute, found)),
            (TypeHandler::Timestamp, SqlValue::Integer(millis)) => Utc
                .timestamp_millis_opt(*millis)
                .single()
                .map(Value::Timestamp)
                .ok_or_else(|| self.mismatch(attribute, found)),
            (t, SqlValue::Integer(v)) if t.is_association() => Ok(Value::Integer(*v)),
            (t, SqlValue::Text(v)) if t.is_association() => Ok(Value::Text(v.clone())),
            _ => Err(self.mismatch(attribute, found)),
        }
    }

    /// Dirty-checking comparison. Associations compare by referenced
    /// identifier, so a snapshot holding `5` equals a reference to `Author#5`.
    pub fn is_same(&self, old: &Value, new: &Value) -> bool {
        match self {
            TypeHandler::OneToMany { .. } => true,
            TypeHandler::ManyToOne { .. } | TypeHandler::OneToOne { .. } => {
                if let (Value::Entity(a), Value::Entity(b)) = (old, new) {
                    if a.same_instance(b) {
                        return true;
                    }
                }
                match (reference_key(old), reference_key(new)) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            _ => old == new,
        }
    }

    fn mismatch(&self, attribute: &str, found: &str) -> ReposeError {
        ReposeError::TypeMismatch {
            attribute: attribute.to_string(),
            expected: self.to_string(),
            found: found.to_string(),
        }
    }
}

impl fmt::Display for TypeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeHandler::Boolean => f.write_str("boolean"),
            TypeHandler::Integer => f.write_str("integer"),
            TypeHandler::Real => f.write_str("real"),
            TypeHandler::Text => f.write_str("text"),
            TypeHandler::Uuid => f.write_str("uuid"),
            TypeHandler::Timestamp => f.write_str("timestamp"),
            TypeHandler::ManyToOne { entity } => write!(f, "many_to_one<{}>", entity),
            TypeHandler::OneToOne { entity } => write!(f, "one_to_one<{}>", entity),
            TypeHandler::OneToMany { entity } => write!(f, "one_to_many<{}>", entity),
        }
    }
}

/// Deep-copy `values` in place through their handlers. Only positions whose
/// mask entry is `true` are copied.
pub fn deep_copy(values: &mut [Value], types: &[&TypeHandler], mask: &[bool]) {
    for ((value, handler), copy) in values.iter_mut().zip(types).zip(mask) {
        if *copy {
            *value = handler.deep_copy(value);
        }
    }
}

pub(crate) fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn referenced_id(
    attribute: &str,
    entity_name: &str,
    value: &Value,
    pc: &PersistenceContext,
) -> Result<Identifier> {
    let transient = || ReposeError::TransientReference {
        entity_name: entity_name.to_string(),
        attribute: attribute.to_string(),
    };
    match value {
        Value::Entity(e) => match pc.get_entry(e) {
            Some(entry) => entry.id().cloned().ok_or_else(transient),
            None => e.id().ok_or_else(transient),
        },
        Value::Proxy(p) => Ok(p.id()),
        Value::Integer(v) => Ok(Identifier::Long(*v)),
        Value::Text(v) => Ok(Identifier::Text(v.clone())),
        Value::Uuid(v) => Ok(Identifier::Uuid(*v)),
        other => Err(ReposeError::TypeMismatch {
            attribute: attribute.to_string(),
            expected: format!("reference to {}", entity_name),
            found: other.type_name().to_string(),
        }),
    }
}

fn reference_key(value: &Value) -> Option<Option<String>> {
    match value {
        Value::Null => Some(None),
        Value::Entity(e) => e.id().map(|id| Some(id.to_string())),
        Value::Proxy(p) => Some(Some(p.id().to_string())),
        Value::Integer(v) => Some(Some(v.to_string())),
        Value::Text(v) => Some(Some(v.clone())),
        Value::Uuid(v) => Some(Some(v.hyphenated().to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entity::EntityRef;

    fn author_ref() -> TypeHandler {
        TypeHandler::ManyToOne {
            entity: "Author".to_string(),
        }
    }

    #[test]
    fn test_bind_basic_values() {
        let pc = PersistenceContext::new();
        assert_eq!(
            TypeHandler::Boolean.bind("flag", &Value::Boolean(true), &pc).unwrap(),
            SqlValue::Integer(1)
        );
        assert_eq!(
            TypeHandler::Text.bind("title", &Value::Null, &pc).unwrap(),
            SqlValue::Null
        );
    }

    #[test]
    fn test_bind_rejects_wrong_type() {
        let pc = PersistenceContext::new();
        let err = TypeHandler::Text
            .bind("title", &Value::Integer(3), &pc)
            .unwrap_err();
        assert!(matches!(err, ReposeError::TypeMismatch { .. }));
    }

    #[test]
    fn test_bind_association_uses_referenced_id() {
        let pc = PersistenceContext::new();
        let author = EntityRef::new("Author").with_id(5);
        assert_eq!(
            author_ref().bind("author", &Value::from(&author), &pc).unwrap(),
            SqlValue::Integer(5)
        );
    }

    #[test]
    fn test_bind_association_without_id_is_transient() {
        let pc = PersistenceContext::new();
        let author = EntityRef::new("Author");
        let err = author_ref()
            .bind("author", &Value::from(&author), &pc)
            .unwrap_err();
        assert!(matches!(err, ReposeError::TransientReference { .. }));
    }

    #[test]
    fn test_timestamp_round_trip_at_millisecond_precision() {
        let t = Utc.timestamp_millis_opt(1_700_000_000_123).single().unwrap();
        let pc = PersistenceContext::new();
        let sql = TypeHandler::Timestamp
            .bind("at", &Value::Timestamp(t), &pc)
            .unwrap();
        assert_eq!(
            TypeHandler::Timestamp.read("at", &sql).unwrap(),
            Value::Timestamp(t)
        );
    }

    #[test]
    fn test_is_same_compares_association_by_id() {
        let author = EntityRef::new("Author").with_id(5);
        assert!(author_ref().is_same(&Value::Integer(5), &Value::from(&author)));
        assert!(!author_ref().is_same(&Value::Integer(6), &Value::from(&author)));
        assert!(author_ref().is_same(&Value::Null, &Value::Null));
    }

    #[test]
    fn test_deep_copy_honours_mask() {
        use crate::model::collection::PersistentCollection;
        let wrapped = Value::Collection(CollectionValue::Wrapped(PersistentCollection::new(
            "Author.books",
            vec![EntityRef::new("Book")],
        )));
        let handler = TypeHandler::OneToMany {
            entity: "Book".to_string(),
        };
        let mut values = vec![wrapped.clone(), wrapped];
        deep_copy(&mut values, &[&handler, &handler], &[true, false]);
        assert!(matches!(values[0], Value::Collection(CollectionValue::Raw(_))));
        assert!(matches!(
            values[1],
            Value::Collection(CollectionValue::Wrapped(_))
        ));
    }
}
