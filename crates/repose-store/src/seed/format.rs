//! Seed document schema
//!
//! A seed declares entity mappings and an object graph to persist:
//!
//! ```yaml
//! schema_version: 1
//! entities:
//!   - name: Author
//!     table: authors
//!     id: { type: long, strategy: identity }
//!     attributes:
//!       - { name: name, type: text, nullable: false }
//!       - { name: books, type: one_to_many, target: Book, cascade: persist }
//!   - name: Book
//!     table: books
//!     id: { type: long }
//!     attributes:
//!       - { name: title, type: text }
//!       - { name: author, type: many_to_one, target: Author }
//! objects:
//!   - { entity: Author, ref: herbert, values: { name: Frank Herbert, books: [dune] } }
//!   - { entity: Book, ref: dune, id: 7, values: { title: Dune, author: herbert } }
//! ```
//!
//! Association values name other objects by their `ref` label.

use repose_core::model::IdType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SEED_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedDocument {
    pub schema_version: u32,
    pub entities: Vec<SeedEntity>,
    #[serde(default)]
    pub objects: Vec<SeedObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedEntity {
    pub name: String,
    pub table: String,
    /// Parent entity; the identifier and attributes are inherited
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub id: Option<SeedId>,
    #[serde(default)]
    pub attributes: Vec<SeedAttribute>,
    #[serde(default)]
    pub version: Option<SeedVersion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedId {
    #[serde(default = "default_id_name")]
    pub name: String,
    /// Defaults to the attribute name
    #[serde(default)]
    pub column: Option<String>,
    #[serde(rename = "type")]
    pub id_type: IdType,
    #[serde(default)]
    pub strategy: SeedIdStrategy,
    /// Sequence name or id-table segment; defaults to the table name
    #[serde(default)]
    pub generator: Option<String>,
}

fn default_id_name() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedIdStrategy {
    #[default]
    Assigned,
    Identity,
    Sequence,
    Table,
    Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedAttribute {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SeedAttributeType,
    /// Associated entity, required for association types
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default = "yes")]
    pub nullable: bool,
    #[serde(default = "yes")]
    pub insertable: bool,
    #[serde(default = "yes")]
    pub updatable: bool,
    /// Comma-separated cascade style, e.g. `persist,merge` or `all`
    #[serde(default)]
    pub cascade: Option<String>,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedAttributeType {
    Boolean,
    Integer,
    Real,
    Text,
    Uuid,
    Timestamp,
    ManyToOne,
    OneToOne,
    OneToMany,
}

impl SeedAttributeType {
    pub fn is_association(self) -> bool {
        matches!(
            self,
            SeedAttributeType::ManyToOne | SeedAttributeType::OneToOne | SeedAttributeType::OneToMany
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedVersion {
    pub attribute: String,
    #[serde(rename = "type", default)]
    pub version_type: SeedVersionType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedVersionType {
    #[default]
    Counter,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedObject {
    pub entity: String,
    /// Label other objects use to reference this one
    #[serde(default, rename = "ref")]
    pub label: Option<String>,
    /// Required for assigned identifiers, ignored otherwise
    #[serde(default)]
    pub id: Option<serde_yaml::Value>,
    #[serde(default)]
    pub values: BTreeMap<String, serde_yaml::Value>,
}
