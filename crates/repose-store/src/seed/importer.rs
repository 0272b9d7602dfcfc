//! Seed importer orchestration
//!
//! Import runs in one transaction:
//! 1. Build the registry and export the mapped schema
//! 2. Skip documents whose digest is already recorded
//! 3. Instantiate every object, then wire associations by ref label
//! 4. Persist each object through a session (cascades apply as mapped)
//! 5. Flush, record the digest, commit

use crate::connection::SqliteConnection;
use crate::dialect::SqliteDialect;
use crate::errors::{pipeline, Result};
use crate::schema::{export_schema, SEED_IMPORT_TABLE};
use crate::seed::compute_seed_digest;
use crate::seed::format::SeedDocument;
use crate::seed::parser::{
    association_labels, build_registry, object_id, parse_seed_file, scalar_value, validate_objects,
};
use repose_core::config::SessionSettings;
use repose_core::connection::ReactiveConnection;
use repose_core::metamodel::MappingRegistry;
use repose_core::model::{EntityRef, Identifier, SqlValue, Value};
use repose_core::{log_op_end, log_op_error, log_op_start, Session, SessionFactory};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub digest: String,
    /// The digest was already recorded; nothing was written
    pub already_imported: bool,
    /// Persisted objects in document order
    pub objects: Vec<ImportedObject>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedObject {
    pub entity: String,
    pub label: Option<String>,
    pub id: Identifier,
}

pub async fn import_seed(
    path: &Path,
    connection: &SqliteConnection,
    settings: &SessionSettings,
) -> Result<ImportReport> {
    let document = parse_seed_file(path)?;
    import_document(&document, connection, settings).await
}

pub async fn import_document(
    document: &SeedDocument,
    connection: &SqliteConnection,
    settings: &SessionSettings,
) -> Result<ImportReport> {
    let start = Instant::now();
    let digest = compute_seed_digest(document)?;
    log_op_start!("seed_import", digest = digest.as_str());

    let result = run_import(document, connection, settings, &digest).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(report) => {
            log_op_end!(
                "seed_import",
                duration_ms = duration_ms,
                objects = report.objects.len(),
                already_imported = report.already_imported
            );
        }
        Err(err) => {
            log_op_error!("seed_import", err.clone(), duration_ms = duration_ms);
        }
    }
    result
}

async fn run_import(
    document: &SeedDocument,
    connection: &SqliteConnection,
    settings: &SessionSettings,
    digest: &str,
) -> Result<ImportReport> {
    let registry = build_registry(document)?;
    validate_objects(document, &registry)?;
    connection.with_connection(|conn| export_schema(conn, &registry, &SqliteDialect))?;

    if is_imported(connection, digest).await? {
        tracing::info!(digest, "seed already imported");
        return Ok(ImportReport {
            digest: digest.to_string(),
            already_imported: true,
            objects: Vec::new(),
        });
    }

    let instances = instantiate(document, &registry)?;
    let factory = SessionFactory::new(registry, Arc::new(SqliteDialect), settings.clone())
        .map_err(pipeline("seed_import"))?;
    let mut session = factory.open_session(Rc::new(connection.clone()));

    session.begin().await.map_err(pipeline("seed_import"))?;
    let persisted = match persist_all(&mut session, &instances, connection, digest).await {
        Ok(()) => session.commit().await.map_err(pipeline("seed_import")),
        Err(err) => Err(err),
    };
    if let Err(err) = persisted {
        if session.is_transaction_in_progress() {
            if let Err(rollback_err) = session.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback after failed seed import failed");
            }
        }
        return Err(err);
    }

    let objects = document
        .objects
        .iter()
        .zip(&instances)
        .map(|(object, instance)| {
            let id = instance.id().ok_or_else(|| {
                pipeline("seed_import")(repose_core::ReposeError::NullIdentifier {
                    entity_name: object.entity.clone(),
                })
            })?;
            Ok(ImportedObject {
                entity: object.entity.clone(),
                label: object.label.clone(),
                id,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ImportReport {
        digest: digest.to_string(),
        already_imported: false,
        objects,
    })
}

async fn is_imported(connection: &SqliteConnection, digest: &str) -> Result<bool> {
    let rows = connection
        .select(
            &format!("SELECT 1 FROM {} WHERE digest = ?", SEED_IMPORT_TABLE),
            vec![SqlValue::Text(digest.to_string())],
        )
        .await
        .map_err(pipeline("seed_import"))?;
    Ok(!rows.is_empty())
}

async fn persist_all(
    session: &mut Session,
    instances: &[EntityRef],
    connection: &SqliteConnection,
    digest: &str,
) -> Result<()> {
    for instance in instances {
        session
            .persist(instance)
            .await
            .map_err(pipeline("seed_import"))?;
    }
    session.flush().await.map_err(pipeline("seed_import"))?;

    connection
        .execute(
            &format!(
                "INSERT INTO {} (digest, imported_at, object_count) VALUES (?, ?, ?)",
                SEED_IMPORT_TABLE
            ),
            vec![
                SqlValue::Text(digest.to_string()),
                SqlValue::Text(chrono::Utc::now().to_rfc3339()),
                SqlValue::Integer(instances.len() as i64),
            ],
        )
        .await
        .map_err(pipeline("seed_import"))?;
    Ok(())
}

/// One instance per object, associations wired through ref labels
fn instantiate(document: &SeedDocument, registry: &MappingRegistry) -> Result<Vec<EntityRef>> {
    let mut instances = Vec::with_capacity(document.objects.len());
    let mut by_label: HashMap<&str, EntityRef> = HashMap::new();
    for object in &document.objects {
        let descriptor = registry
            .get(&object.entity)
            .map_err(pipeline("seed_import"))?;
        let instance = EntityRef::new(object.entity.as_str());
        instance.set_id(object_id(&descriptor, object)?);
        if let Some(label) = &object.label {
            by_label.insert(label.as_str(), instance.clone());
        }
        instances.push(instance);
    }

    for (object, instance) in document.objects.iter().zip(&instances) {
        let descriptor = registry
            .get(&object.entity)
            .map_err(pipeline("seed_import"))?;
        for (name, raw) in &object.values {
            let Some(index) = descriptor.attribute_index(name) else {
                continue;
            };
            let handler = &descriptor.attributes()[index].handler;
            let value = if handler.is_association() {
                // validate_objects guarantees every label resolves
                let referenced: Vec<EntityRef> = association_labels(handler, name, raw)?
                    .into_iter()
                    .filter_map(|label| by_label.get(label).cloned())
                    .collect();
                if handler.is_collection_type() {
                    Value::from(referenced)
                } else {
                    Value::from(referenced.into_iter().next())
                }
            } else {
                scalar_value(handler, name, raw)?
            };
            instance.set(name, value);
        }
    }

    Ok(instances)
}
