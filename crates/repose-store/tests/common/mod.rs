use repose_core::config::SessionSettings;
use repose_core::model::{
    AttributeMapping, CascadeStyle, EntityDescriptor, IdStrategy, IdType, TypeHandler, VersionType,
};
use repose_core::{MappingRegistry, Session, SessionFactory};
use repose_store::schema::export_schema;
use repose_store::{SqliteConnection, SqliteDialect};
use rusqlite::types::Value as SqliteValue;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

/// Authors (identity ids) own books (assigned ids, versioned); tickets,
/// badges and tokens exercise the sequence, table and UUID generators
#[allow(dead_code)]
pub fn registry() -> MappingRegistry {
    let mut registry = MappingRegistry::new();
    registry
        .register(
            EntityDescriptor::builder("Author", "authors")
                .id("id", "id", IdType::Long, IdStrategy::Identity)
                .attribute(AttributeMapping::basic("name", TypeHandler::Text).not_null())
                .attribute(
                    AttributeMapping::one_to_many("books", "Book")
                        .cascade(CascadeStyle::PERSIST | CascadeStyle::REMOVE),
                )
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            EntityDescriptor::builder("Book", "books")
                .id("id", "id", IdType::Long, IdStrategy::Assigned)
                .attribute(AttributeMapping::basic("title", TypeHandler::Text))
                .attribute(AttributeMapping::many_to_one("author", "Author"))
                .attribute(AttributeMapping::basic("version", TypeHandler::Integer))
                .version("version", VersionType::Counter)
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            EntityDescriptor::builder("Ticket", "tickets")
                .id(
                    "id",
                    "id",
                    IdType::Long,
                    IdStrategy::Sequence {
                        name: "ticket_seq".to_string(),
                    },
                )
                .attribute(AttributeMapping::basic("subject", TypeHandler::Text))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            EntityDescriptor::builder("Badge", "badges")
                .id(
                    "id",
                    "id",
                    IdType::Long,
                    IdStrategy::Table {
                        segment: "badges".to_string(),
                    },
                )
                .attribute(AttributeMapping::basic("code", TypeHandler::Text))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            EntityDescriptor::builder("Token", "tokens")
                .id("id", "id", IdType::Uuid, IdStrategy::Uuid)
                .attribute(AttributeMapping::basic("label", TypeHandler::Text))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

#[allow(dead_code)]
pub fn factory() -> Arc<SessionFactory> {
    SessionFactory::new(registry(), Arc::new(SqliteDialect), SessionSettings::default()).unwrap()
}

/// In-memory database with the mapped tables created
#[allow(dead_code)]
pub fn connection() -> SqliteConnection {
    let connection = SqliteConnection::open_in_memory().unwrap();
    connection
        .with_connection(|conn| {
            conn.pragma_update(None, "foreign_keys", true).unwrap();
            export_schema(conn, &registry(), &SqliteDialect)
        })
        .unwrap();
    connection
}

#[allow(dead_code)]
pub fn open() -> (Session, SqliteConnection) {
    let connection = connection();
    let session = factory().open_session(Rc::new(connection.clone()));
    (session, connection)
}

/// A second session over the same database
#[allow(dead_code)]
pub fn reopen(connection: &SqliteConnection) -> Session {
    factory().open_session(Rc::new(connection.clone()))
}

/// Run a query directly against SQLite, bypassing the pipeline
#[allow(dead_code)]
pub fn query(connection: &SqliteConnection, sql: &str) -> Vec<Vec<SqliteValue>> {
    connection
        .with_connection(|conn| {
            let mut stmt = conn.prepare(sql).unwrap();
            let width = stmt.column_count();
            let rows = stmt
                .query_map([], |row| {
                    (0..width)
                        .map(|i| row.get::<_, SqliteValue>(i))
                        .collect::<rusqlite::Result<Vec<_>>>()
                })
                .unwrap()
                .collect::<rusqlite::Result<Vec<_>>>()
                .unwrap();
            Ok(rows)
        })
        .unwrap()
}

#[allow(dead_code)]
pub fn execute(connection: &SqliteConnection, sql: &str) {
    connection
        .with_connection(|conn| {
            conn.execute_batch(sql).unwrap();
            Ok(())
        })
        .unwrap();
}

#[allow(dead_code)]
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}
