//! Schema export: `CREATE TABLE` statements for every mapped entity
//!
//! The generated DDL is applied through the migration runner under a single
//! migration id, so the checksum recorded in `schema_version` pins the
//! mapping the tables were created from. Changing the mapping afterwards is
//! reported as a checksum mismatch; altering existing tables is out of scope.

use crate::errors::{pipeline, Result};
use crate::migrations::{apply_migration, apply_migrations, compute_checksum};
use repose_core::metamodel::MappingRegistry;
use repose_core::model::{EntityDescriptor, IdStrategy};
use repose_core::sql::{ColumnType, Dialect};
use rusqlite::Connection;

pub const SEQUENCE_TABLE: &str = "repose_sequences";
pub const SEED_IMPORT_TABLE: &str = "repose_seed_imports";

/// Migration id under which the mapped tables are recorded
pub const MAPPED_SCHEMA_MIGRATION: &str = "mapped_schema";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaReport {
    pub statements: Vec<String>,
    pub checksum: String,
    /// `false` when the same DDL had already been applied
    pub applied: bool,
}

struct TableDef {
    name: String,
    columns: Vec<(String, String)>,
}

/// One `CREATE TABLE IF NOT EXISTS` per mapped table, in entity name order.
/// Entities sharing a table contribute the union of their columns.
pub fn create_table_statements(
    registry: &MappingRegistry,
    dialect: &dyn Dialect,
) -> Result<Vec<String>> {
    let mut tables: Vec<TableDef> = Vec::new();

    for descriptor in registry.iter() {
        let columns = column_definitions(registry, descriptor, dialect)?;
        match tables.iter_mut().find(|t| t.name == descriptor.table()) {
            Some(table) => {
                for (column, definition) in columns {
                    if !table.columns.iter().any(|(c, _)| *c == column) {
                        table.columns.push((column, definition));
                    }
                }
            }
            None => tables.push(TableDef {
                name: descriptor.table().to_string(),
                columns,
            }),
        }
    }

    Ok(tables
        .into_iter()
        .map(|table| {
            let body = table
                .columns
                .iter()
                .map(|(_, definition)| format!("    {}", definition))
                .collect::<Vec<_>>()
                .join(",\n");
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
                dialect.quote(&table.name),
                body
            )
        })
        .collect())
}

fn column_definitions(
    registry: &MappingRegistry,
    descriptor: &EntityDescriptor,
    dialect: &dyn Dialect,
) -> Result<Vec<(String, String)>> {
    let identifier = descriptor.identifier();
    let id_definition = match identifier.strategy {
        IdStrategy::Identity => dialect.identity_column().to_string(),
        _ => format!(
            "{} NOT NULL PRIMARY KEY",
            dialect.column_type(ColumnType::from(identifier.id_type))
        ),
    };
    let mut columns = vec![(
        identifier.column.clone(),
        format!("{} {}", dialect.quote(&identifier.column), id_definition),
    )];

    for attribute in descriptor.attributes() {
        let Some(column) = &attribute.column else {
            continue;
        };
        let mut definition = dialect.quote(column);

        match attribute.handler.associated_entity() {
            None => {
                let column_type = attribute.handler.column_type().ok_or_else(|| {
                    pipeline("schema_export")(repose_core::ReposeError::InvalidMapping {
                        entity_name: descriptor.entity_name().to_string(),
                        message: format!("attribute '{}' has no column type", attribute.name),
                    })
                })?;
                definition.push(' ');
                definition.push_str(dialect.column_type(column_type));
                if !attribute.nullable {
                    definition.push_str(" NOT NULL");
                }
            }
            Some(target) => {
                let target = registry.get(target).map_err(pipeline("schema_export"))?;
                definition.push(' ');
                definition.push_str(dialect.column_type(ColumnType::from(target.id_type())));
                if !attribute.nullable {
                    definition.push_str(" NOT NULL");
                }
                // Rows of a subclass live in their own table, so only leaf
                // targets can be referenced by a foreign key
                if !has_subclasses(registry, target.entity_name()) {
                    definition.push_str(&format!(
                        " REFERENCES {} ({}) DEFERRABLE INITIALLY DEFERRED",
                        dialect.quote(target.table()),
                        dialect.quote(&target.identifier().column)
                    ));
                }
            }
        }
        columns.push((column.clone(), definition));
    }

    Ok(columns)
}

fn has_subclasses(registry: &MappingRegistry, entity_name: &str) -> bool {
    registry.iter().any(|d| {
        d.entity_name() != entity_name && registry.is_subclass_of(d.entity_name(), entity_name)
    })
}

/// Apply the support migrations and create the mapped tables
///
/// # Errors
///
/// A checksum mismatch when tables were previously created from a
/// different mapping.
pub fn export_schema(
    conn: &mut Connection,
    registry: &MappingRegistry,
    dialect: &dyn Dialect,
) -> Result<SchemaReport> {
    apply_migrations(conn)?;

    let statements = create_table_statements(registry, dialect)?;
    let sql = statements
        .iter()
        .map(|statement| format!("{};\n", statement))
        .collect::<String>();
    let checksum = compute_checksum(&sql);
    let applied = apply_migration(conn, MAPPED_SCHEMA_MIGRATION, &sql)?;

    tracing::debug!(
        tables = statements.len(),
        checksum = checksum.as_str(),
        applied,
        "schema exported"
    );
    Ok(SchemaReport {
        statements,
        checksum,
        applied,
    })
}
