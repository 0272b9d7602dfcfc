use crate::connection::ReactiveConnection;
use crate::errors::{ReposeError, Result};
use crate::model::descriptor::EntityDescriptor;
use crate::model::value::{Identifier, Value};
use crate::sql::dialect::Dialect;
use std::sync::Arc;

/// Reads the current database state of one entity row
///
/// The select starts with a literal `1` so a row whose attributes are all
/// null is still told apart from a missing row. Attributes without a
/// column (collections) select the identifier column again: their
/// snapshot slot holds the collection key.
#[derive(Debug, Clone)]
pub struct SnapshotLoader {
    descriptor: Arc<EntityDescriptor>,
    sql: String,
}

impl SnapshotLoader {
    pub fn new(descriptor: Arc<EntityDescriptor>, dialect: &dyn Dialect) -> Self {
        let id_column = dialect.quote(&descriptor.identifier().column);
        let mut columns = vec!["1".to_string()];
        columns.extend(descriptor.attributes().iter().map(|a| match &a.column {
            Some(column) => dialect.quote(column),
            None => id_column.clone(),
        }));
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {}",
            columns.join(", "),
            dialect.quote(descriptor.table()),
            id_column,
            dialect.placeholder(1)
        );
        Self { descriptor, sql }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// `None` when no row has this identifier; otherwise the attribute
    /// values in declaration order (empty when the entity has none)
    ///
    /// # Errors
    ///
    /// Driver errors, type conversion errors, and
    /// [`ReposeError::ProtocolViolation`] when more than one row matches.
    pub async fn load_snapshot(
        &self,
        id: &Identifier,
        connection: &dyn ReactiveConnection,
    ) -> Result<Option<Vec<Value>>> {
        let params = vec![self.descriptor.id_type().to_sql(id)?];
        tracing::debug!(
            sql = self.sql.as_str(),
            entity_name = self.descriptor.entity_name(),
            entity_id = %id,
            "load snapshot"
        );
        let mut rows = connection.select(&self.sql, params).await?;

        if rows.len() > 1 {
            return Err(ReposeError::protocol(format!(
                "snapshot of {}#{} matched {} rows",
                self.descriptor.entity_name(),
                id,
                rows.len()
            )));
        }
        let Some(row) = rows.pop() else {
            return Ok(None);
        };
        if row.len() <= 1 {
            return Ok(Some(Vec::new()));
        }

        let attributes = self.descriptor.attributes();
        if row.len() - 1 != attributes.len() {
            return Err(ReposeError::protocol(format!(
                "snapshot of {} returned {} columns for {} attributes",
                self.descriptor.entity_name(),
                row.len() - 1,
                attributes.len()
            )));
        }
        row[1..]
            .iter()
            .zip(attributes)
            .map(|(column, attribute)| attribute.handler.read(&attribute.name, column))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}
