//! Reading one row back as JSON through the snapshot loader

use crate::connection::SqliteConnection;
use crate::dialect::SqliteDialect;
use crate::errors::{pipeline, Result};
use crate::seed::{build_registry, SeedDocument};
use repose_core::config::SessionSettings;
use repose_core::model::EntityDescriptor;
use repose_core::model::Value;
use repose_core::SessionFactory;
use serde_json::{json, Map};
use std::sync::Arc;

/// Load the database state of `entity_name#id` under the mapping the seed
/// document declares. `None` when no such row exists.
///
/// Collections are omitted: their snapshot slot only repeats the owner's
/// key.
pub async fn read_snapshot(
    document: &SeedDocument,
    connection: &SqliteConnection,
    entity_name: &str,
    id: &str,
) -> Result<Option<serde_json::Value>> {
    let registry = build_registry(document)?;
    let factory = SessionFactory::new(registry, Arc::new(SqliteDialect), SessionSettings::default())
        .map_err(pipeline("snapshot"))?;
    let persister = factory.persister(entity_name).map_err(pipeline("snapshot"))?;
    let descriptor = persister.descriptor();
    let id = descriptor.id_type().parse(id).map_err(pipeline("snapshot"))?;

    let snapshot = persister
        .snapshot_loader()
        .load_snapshot(&id, connection)
        .await
        .map_err(pipeline("snapshot"))?;

    Ok(snapshot.map(|values| {
        json!({
            "entity": descriptor.entity_name(),
            "id": id.to_value().to_json(),
            "values": render_values(descriptor, &values),
        })
    }))
}

fn render_values(descriptor: &EntityDescriptor, values: &[Value]) -> serde_json::Value {
    let rendered: Map<String, serde_json::Value> = descriptor
        .attributes()
        .iter()
        .zip(values)
        .filter(|(attribute, _)| attribute.column.is_some())
        .map(|(attribute, value)| (attribute.name.clone(), value.to_json()))
        .collect();
    serde_json::Value::Object(rendered)
}
