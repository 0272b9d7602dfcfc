//! Runtime values held by entity instances and exchanged with the driver

use crate::errors::{ReposeError, Result};
use crate::model::collection::CollectionValue;
use crate::model::entity::{EntityRef, ProxyRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a persistent instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identifier {
    Long(i64),
    Text(String),
    Uuid(Uuid),
}

impl Identifier {
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Identifier::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// The identifier as a property value (used for association snapshots)
    pub fn to_value(&self) -> Value {
        match self {
            Identifier::Long(v) => Value::Integer(*v),
            Identifier::Text(v) => Value::Text(v.clone()),
            Identifier::Uuid(v) => Value::Uuid(*v),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Long(v) => write!(f, "{}", v),
            Identifier::Text(v) => f.write_str(v),
            Identifier::Uuid(v) => write!(f, "{}", v.hyphenated()),
        }
    }
}

impl From<i64> for Identifier {
    fn from(v: i64) -> Self {
        Identifier::Long(v)
    }
}

impl From<i32> for Identifier {
    fn from(v: i32) -> Self {
        Identifier::Long(i64::from(v))
    }
}

impl From<&str> for Identifier {
    fn from(v: &str) -> Self {
        Identifier::Text(v.to_string())
    }
}

impl From<String> for Identifier {
    fn from(v: String) -> Self {
        Identifier::Text(v)
    }
}

impl From<Uuid> for Identifier {
    fn from(v: Uuid) -> Self {
        Identifier::Uuid(v)
    }
}

/// Declared type of an identifier attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdType {
    Long,
    Text,
    Uuid,
}

impl IdType {
    /// Convert a generated or user-supplied identifier to this type
    pub fn coerce(self, id: &Identifier) -> Result<Identifier> {
        match (self, id) {
            (IdType::Long, Identifier::Long(_))
            | (IdType::Text, Identifier::Text(_))
            | (IdType::Uuid, Identifier::Uuid(_)) => Ok(id.clone()),
            (IdType::Text, other) => Ok(Identifier::Text(other.to_string())),
            (IdType::Long, Identifier::Text(s)) => s
                .parse::<i64>()
                .map(Identifier::Long)
                .map_err(|_| id_mismatch(self, id)),
            (IdType::Uuid, Identifier::Text(s)) => Uuid::parse_str(s)
                .map(Identifier::Uuid)
                .map_err(|_| id_mismatch(self, id)),
            _ => Err(id_mismatch(self, id)),
        }
    }

    /// Parse an identifier from its textual form
    pub fn parse(self, text: &str) -> Result<Identifier> {
        self.coerce(&Identifier::Text(text.to_string()))
    }

    pub fn to_sql(self, id: &Identifier) -> Result<SqlValue> {
        Ok(match self.coerce(id)? {
            Identifier::Long(v) => SqlValue::Integer(v),
            Identifier::Text(v) => SqlValue::Text(v),
            Identifier::Uuid(v) => SqlValue::Text(v.hyphenated().to_string()),
        })
    }

    pub fn from_sql(self, value: &SqlValue) -> Result<Identifier> {
        let raw = match value {
            SqlValue::Integer(v) => Identifier::Long(*v),
            SqlValue::Text(v) => Identifier::Text(v.clone()),
            other => {
                return Err(ReposeError::TypeMismatch {
                    attribute: "<identifier>".to_string(),
                    expected: format!("{:?}", self),
                    found: other.type_name().to_string(),
                })
            }
        };
        self.coerce(&raw)
    }

    /// Read an identifier out of a property value (association snapshots,
    /// seed documents)
    pub fn from_value(self, value: &Value) -> Result<Option<Identifier>> {
        let raw = match value {
            Value::Null => return Ok(None),
            Value::Integer(v) => Identifier::Long(*v),
            Value::Text(v) => Identifier::Text(v.clone()),
            Value::Uuid(v) => Identifier::Uuid(*v),
            other => {
                return Err(ReposeError::TypeMismatch {
                    attribute: "<identifier>".to_string(),
                    expected: format!("{:?}", self),
                    found: other.type_name().to_string(),
                })
            }
        };
        self.coerce(&raw).map(Some)
    }
}

fn id_mismatch(expected: IdType, found: &Identifier) -> ReposeError {
    ReposeError::TypeMismatch {
        attribute: "<identifier>".to_string(),
        expected: format!("{:?}", expected),
        found: format!("{:?}", found),
    }
}

/// A property value of an entity instance
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Entity(EntityRef),
    Proxy(ProxyRef),
    Collection(CollectionValue),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Uuid(_) => "uuid",
            Value::Timestamp(_) => "timestamp",
            Value::Entity(_) => "entity",
            Value::Proxy(_) => "proxy",
            Value::Collection(_) => "collection",
        }
    }

    /// JSON rendering; associations render as the referenced identifier
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Boolean(v) => Json::Bool(*v),
            Value::Integer(v) => Json::from(*v),
            Value::Real(v) => Json::from(*v),
            Value::Text(v) => Json::String(v.clone()),
            Value::Uuid(v) => Json::String(v.hyphenated().to_string()),
            Value::Timestamp(v) => Json::String(v.to_rfc3339()),
            Value::Entity(e) => e
                .id()
                .map(|id| id.to_value().to_json())
                .unwrap_or(Json::Null),
            Value::Proxy(p) => p.id().to_value().to_json(),
            Value::Collection(c) => Json::Array(
                c.elements()
                    .iter()
                    .map(|e| e.id().map(|id| id.to_value().to_json()).unwrap_or(Json::Null))
                    .collect(),
            ),
        }
    }
}

/// Entities, proxies and collections compare by object identity
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Entity(a), Value::Entity(b)) => a.same_instance(b),
            (Value::Proxy(a), Value::Proxy(b)) => a.same_proxy(b),
            (Value::Collection(a), Value::Collection(b)) => a.same_elements(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<EntityRef> for Value {
    fn from(v: EntityRef) -> Self {
        Value::Entity(v)
    }
}

impl From<&EntityRef> for Value {
    fn from(v: &EntityRef) -> Self {
        Value::Entity(v.clone())
    }
}

impl From<ProxyRef> for Value {
    fn from(v: ProxyRef) -> Self {
        Value::Proxy(v)
    }
}

impl From<CollectionValue> for Value {
    fn from(v: CollectionValue) -> Self {
        Value::Collection(v)
    }
}

impl From<Vec<EntityRef>> for Value {
    fn from(v: Vec<EntityRef>) -> Self {
        Value::Collection(CollectionValue::Raw(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A parameter or column value at the driver boundary
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Integer(_) => "integer",
            SqlValue::Real(_) => "real",
            SqlValue::Text(_) => "text",
            SqlValue::Blob(_) => "blob",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Integer(v) => write!(f, "{}", v),
            SqlValue::Real(v) => write!(f, "{}", v),
            SqlValue::Text(v) => write!(f, "'{}'", v),
            SqlValue::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_text_to_long() {
        let id = IdType::Long.coerce(&Identifier::from("42")).unwrap();
        assert_eq!(id, Identifier::Long(42));
    }

    #[test]
    fn test_coerce_rejects_garbage() {
        let err = IdType::Long.coerce(&Identifier::from("forty")).unwrap_err();
        assert!(matches!(err, ReposeError::TypeMismatch { .. }));
    }

    #[test]
    fn test_uuid_identifier_binds_as_text() {
        let raw = Uuid::new_v4();
        let sql = IdType::Uuid.to_sql(&Identifier::Uuid(raw)).unwrap();
        assert_eq!(sql, SqlValue::Text(raw.hyphenated().to_string()));
        assert_eq!(IdType::Uuid.from_sql(&sql).unwrap(), Identifier::Uuid(raw));
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<&str> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
    }

    #[test]
    fn test_entity_values_compare_by_identity() {
        let a = EntityRef::new("Book").with_id(1);
        let b = EntityRef::new("Book").with_id(1);
        assert_eq!(Value::from(&a), Value::from(&a));
        assert_ne!(Value::from(&a), Value::from(&b));
    }
}
