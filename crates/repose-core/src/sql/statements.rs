use crate::engine::persistence_context::PersistenceContext;
use crate::errors::Result;
use crate::model::descriptor::EntityDescriptor;
use crate::model::value::{Identifier, SqlValue, Value};
use crate::sql::dialect::Dialect;

/// Write statements of one entity, rendered once per descriptor
#[derive(Debug, Clone)]
pub struct EntityStatements {
    insert: String,
    identity_insert: String,
    update: Option<String>,
    delete: String,
    insert_attributes: Vec<usize>,
    update_attributes: Vec<usize>,
    version_attribute: Option<usize>,
}

impl EntityStatements {
    pub fn new(descriptor: &EntityDescriptor, dialect: &dyn Dialect) -> Self {
        let attributes = descriptor.attributes();
        let version_attribute = descriptor.version_property();
        let table = dialect.quote(descriptor.table());
        let id_column = dialect.quote(&descriptor.identifier().column);

        let insert_attributes: Vec<usize> = attributes
            .iter()
            .enumerate()
            .filter(|(_, a)| a.column.is_some() && a.insertable)
            .map(|(i, _)| i)
            .collect();
        let update_attributes: Vec<usize> = attributes
            .iter()
            .enumerate()
            .filter(|(i, a)| a.column.is_some() && (a.updatable || Some(*i) == version_attribute))
            .map(|(i, _)| i)
            .collect();

        let column = |index: usize| {
            dialect.quote(attributes[index].column.as_deref().unwrap_or_default())
        };

        let insert = {
            let mut columns = vec![id_column.clone()];
            columns.extend(insert_attributes.iter().map(|i| column(*i)));
            let params: Vec<String> = (1..=columns.len()).map(|i| dialect.placeholder(i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                params.join(", ")
            )
        };

        let identity_insert = if insert_attributes.is_empty() {
            dialect.empty_insert(descriptor.table())
        } else {
            let columns: Vec<String> = insert_attributes.iter().map(|i| column(*i)).collect();
            let params: Vec<String> = (1..=columns.len()).map(|i| dialect.placeholder(i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                params.join(", ")
            )
        };

        let version_clause = |next: usize| {
            version_attribute
                .map(|v| format!(" AND {} = {}", column(v), dialect.placeholder(next)))
                .unwrap_or_default()
        };

        let update = if update_attributes.is_empty() {
            None
        } else {
            let assignments: Vec<String> = update_attributes
                .iter()
                .enumerate()
                .map(|(n, i)| format!("{} = {}", column(*i), dialect.placeholder(n + 1)))
                .collect();
            let id_param = update_attributes.len() + 1;
            Some(format!(
                "UPDATE {} SET {} WHERE {} = {}{}",
                table,
                assignments.join(", "),
                id_column,
                dialect.placeholder(id_param),
                version_clause(id_param + 1)
            ))
        };

        let delete = format!(
            "DELETE FROM {} WHERE {} = {}{}",
            table,
            id_column,
            dialect.placeholder(1),
            version_clause(2)
        );

        Self {
            insert,
            identity_insert,
            update,
            delete,
            insert_attributes,
            update_attributes,
            version_attribute,
        }
    }

    pub fn insert_sql(&self) -> &str {
        &self.insert
    }

    pub fn identity_insert_sql(&self) -> &str {
        &self.identity_insert
    }

    /// `None` when the entity has no updatable column
    pub fn update_sql(&self) -> Option<&str> {
        self.update.as_deref()
    }

    pub fn delete_sql(&self) -> &str {
        &self.delete
    }

    /// Parameters of the regular insert: identifier, then insertable columns
    pub fn bind_insert(
        &self,
        descriptor: &EntityDescriptor,
        id: &Identifier,
        values: &[Value],
        pc: &PersistenceContext,
    ) -> Result<Vec<SqlValue>> {
        let mut params = vec![descriptor.id_type().to_sql(id)?];
        params.extend(self.bind_columns(descriptor, &self.insert_attributes, values, pc)?);
        Ok(params)
    }

    pub fn bind_identity_insert(
        &self,
        descriptor: &EntityDescriptor,
        values: &[Value],
        pc: &PersistenceContext,
    ) -> Result<Vec<SqlValue>> {
        self.bind_columns(descriptor, &self.insert_attributes, values, pc)
    }

    pub fn bind_update(
        &self,
        descriptor: &EntityDescriptor,
        id: &Identifier,
        values: &[Value],
        previous_version: Option<&Value>,
        pc: &PersistenceContext,
    ) -> Result<Vec<SqlValue>> {
        let mut params = self.bind_columns(descriptor, &self.update_attributes, values, pc)?;
        params.push(descriptor.id_type().to_sql(id)?);
        params.extend(self.bind_version(descriptor, previous_version, pc)?);
        Ok(params)
    }

    pub fn bind_delete(
        &self,
        descriptor: &EntityDescriptor,
        id: &Identifier,
        version: Option<&Value>,
        pc: &PersistenceContext,
    ) -> Result<Vec<SqlValue>> {
        let mut params = vec![descriptor.id_type().to_sql(id)?];
        params.extend(self.bind_version(descriptor, version, pc)?);
        Ok(params)
    }

    fn bind_columns(
        &self,
        descriptor: &EntityDescriptor,
        indexes: &[usize],
        values: &[Value],
        pc: &PersistenceContext,
    ) -> Result<Vec<SqlValue>> {
        let attributes = descriptor.attributes();
        indexes
            .iter()
            .map(|&i| {
                let value = values.get(i).unwrap_or(&Value::Null);
                attributes[i].handler.bind(&attributes[i].name, value, pc)
            })
            .collect()
    }

    fn bind_version(
        &self,
        descriptor: &EntityDescriptor,
        version: Option<&Value>,
        pc: &PersistenceContext,
    ) -> Result<Option<SqlValue>> {
        match self.version_attribute {
            None => Ok(None),
            Some(index) => {
                let attribute = &descriptor.attributes()[index];
                attribute
                    .handler
                    .bind(&attribute.name, version.unwrap_or(&Value::Null), pc)
                    .map(Some)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::descriptor::{AttributeMapping, IdStrategy, VersionType};
    use crate::model::types::TypeHandler;
    use crate::model::value::IdType;
    use crate::sql::dialect::StandardDialect;

    fn book() -> EntityDescriptor {
        EntityDescriptor::builder("Book", "books")
            .id("id", "id", IdType::Long, IdStrategy::Assigned)
            .attribute(AttributeMapping::basic("title", TypeHandler::Text))
            .attribute(AttributeMapping::basic("isbn", TypeHandler::Text).read_only())
            .attribute(AttributeMapping::many_to_one("author", "Author"))
            .attribute(AttributeMapping::basic("version", TypeHandler::Integer))
            .version("version", VersionType::Counter)
            .build()
            .unwrap()
    }

    #[test]
    fn test_insert_lists_id_then_columns() {
        let s = EntityStatements::new(&book(), &StandardDialect);
        assert_eq!(
            s.insert_sql(),
            "INSERT INTO \"books\" (\"id\", \"title\", \"isbn\", \"author_id\", \"version\") VALUES (?, ?, ?, ?, ?)"
        );
    }

    #[test]
    fn test_update_skips_read_only_and_checks_version() {
        let s = EntityStatements::new(&book(), &StandardDialect);
        assert_eq!(
            s.update_sql(),
            Some("UPDATE \"books\" SET \"title\" = ?, \"author_id\" = ?, \"version\" = ? WHERE \"id\" = ? AND \"version\" = ?")
        );
        assert_eq!(
            s.delete_sql(),
            "DELETE FROM \"books\" WHERE \"id\" = ? AND \"version\" = ?"
        );
    }

    #[test]
    fn test_identity_insert_without_columns_uses_default_values() {
        let d = EntityDescriptor::builder("Marker", "markers")
            .id("id", "id", IdType::Long, IdStrategy::Identity)
            .build()
            .unwrap();
        let s = EntityStatements::new(&d, &StandardDialect);
        assert_eq!(s.identity_insert_sql(), "INSERT INTO \"markers\" DEFAULT VALUES");
        assert!(s.update_sql().is_none());
    }

    #[test]
    fn test_bind_update_orders_parameters() {
        let d = book();
        let s = EntityStatements::new(&d, &StandardDialect);
        let pc = PersistenceContext::new();
        let values = vec![
            Value::from("T"),
            Value::from("isbn"),
            Value::Null,
            Value::Integer(2),
        ];
        let params = s
            .bind_update(&d, &Identifier::Long(9), &values, Some(&Value::Integer(1)), &pc)
            .unwrap();
        assert_eq!(
            params,
            vec![
                SqlValue::Text("T".to_string()),
                SqlValue::Null,
                SqlValue::Integer(2),
                SqlValue::Integer(9),
                SqlValue::Integer(1),
            ]
        );
    }
}
