#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{factory, factory_with, open, FakeConnection};
use repose_core::config::SessionSettings;
use repose_core::errors::ReposeError;
use repose_core::model::{Identifier, SqlValue, Value};

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

#[tokio::test]
async fn test_s6_missing_row_yields_none() {
    // GIVEN an empty table
    let connection = FakeConnection::new();
    let factory = factory();
    let loader = factory.persister("Book").unwrap().snapshot_loader();

    // WHEN loading a snapshot of Book#999
    let snapshot = loader
        .load_snapshot(&Identifier::Long(999), connection.as_ref())
        .await
        .unwrap();

    // THEN there is none and exactly one select was issued
    assert!(snapshot.is_none());
    let statements = connection.statements();
    assert_eq!(statements.len(), 1);
    assert_eq!(
        statements[0].sql,
        "SELECT 1, \"title\", \"author_id\" FROM \"books\" WHERE \"id\" = ?"
    );
    assert_eq!(statements[0].params, vec![SqlValue::Integer(999)]);
}

#[tokio::test]
async fn test_row_converts_through_attribute_handlers() {
    let connection = FakeConnection::new();
    connection.script_row(
        "books",
        SqlValue::Integer(1),
        vec![SqlValue::Integer(1), text("Dune"), SqlValue::Integer(5)],
    );
    let factory = factory();

    let snapshot = factory
        .persister("Book")
        .unwrap()
        .snapshot_loader()
        .load_snapshot(&Identifier::Long(1), connection.as_ref())
        .await
        .unwrap()
        .unwrap();

    // Associations read as the referenced identifier
    assert_eq!(snapshot, vec![Value::from("Dune"), Value::Integer(5)]);
}

#[tokio::test]
async fn test_all_null_row_is_distinct_from_missing_row() {
    let connection = FakeConnection::new();
    connection.script_row(
        "books",
        SqlValue::Integer(2),
        vec![SqlValue::Integer(1), SqlValue::Null, SqlValue::Null],
    );
    let factory = factory();

    let snapshot = factory
        .persister("Book")
        .unwrap()
        .snapshot_loader()
        .load_snapshot(&Identifier::Long(2), connection.as_ref())
        .await
        .unwrap();

    assert_eq!(snapshot, Some(vec![Value::Null, Value::Null]));
}

#[tokio::test]
async fn test_collection_slot_holds_owner_key() {
    let connection = FakeConnection::new();
    connection.script_row(
        "authors",
        SqlValue::Integer(8),
        vec![SqlValue::Integer(1), text("Herbert"), SqlValue::Integer(8)],
    );
    let factory = factory();
    let loader = factory.persister("Author").unwrap().snapshot_loader();
    assert_eq!(
        loader.sql(),
        "SELECT 1, \"name\", \"id\" FROM \"authors\" WHERE \"id\" = ?"
    );

    let snapshot = loader
        .load_snapshot(&Identifier::Long(8), connection.as_ref())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(snapshot, vec![Value::from("Herbert"), Value::Integer(8)]);
}

#[tokio::test]
async fn test_duplicate_rows_are_a_protocol_violation() {
    // GIVEN two rows answering the same identifier
    let connection = FakeConnection::new();
    for title in ["A", "B"] {
        connection.script_row(
            "books",
            SqlValue::Integer(3),
            vec![SqlValue::Integer(1), text(title), SqlValue::Null],
        );
    }
    let factory = factory();

    // WHEN loading
    let result = factory
        .persister("Book")
        .unwrap()
        .snapshot_loader()
        .load_snapshot(&Identifier::Long(3), connection.as_ref())
        .await;

    // THEN the loader refuses to pick one
    assert!(matches!(result, Err(ReposeError::ProtocolViolation { .. })));
}

#[tokio::test]
async fn test_column_count_mismatch_is_a_protocol_violation() {
    let connection = FakeConnection::new();
    connection.script_row("books", SqlValue::Integer(4), vec![SqlValue::Integer(1), text("T")]);
    let factory = factory();

    let result = factory
        .persister("Book")
        .unwrap()
        .snapshot_loader()
        .load_snapshot(&Identifier::Long(4), connection.as_ref())
        .await;

    assert!(matches!(result, Err(ReposeError::ProtocolViolation { .. })));
}

#[tokio::test]
async fn test_wrong_column_type_fails_conversion() {
    let connection = FakeConnection::new();
    connection.script_row(
        "books",
        SqlValue::Integer(5),
        vec![SqlValue::Integer(1), SqlValue::Integer(77), SqlValue::Null],
    );
    let factory = factory();

    let result = factory
        .persister("Book")
        .unwrap()
        .snapshot_loader()
        .load_snapshot(&Identifier::Long(5), connection.as_ref())
        .await;

    assert!(matches!(result, Err(ReposeError::TypeMismatch { .. })));
}

#[tokio::test]
async fn test_session_caches_snapshots_until_flush() {
    // GIVEN a session with snapshot caching (the default)
    let (mut session, connection) = open();
    connection.script_row(
        "books",
        SqlValue::Integer(1),
        vec![SqlValue::Integer(1), text("Dune"), SqlValue::Null],
    );
    let id = Identifier::Long(1);

    // WHEN asking twice
    let first = session.get_database_snapshot("Book", &id).await.unwrap();
    let second = session.get_database_snapshot("Book", &id).await.unwrap();

    // THEN one select served both
    assert_eq!(first, second);
    assert_eq!(connection.selects(), 1);

    // AND a flush drops the cache
    session.flush().await.unwrap();
    session.get_database_snapshot("Book", &id).await.unwrap();
    assert_eq!(connection.selects(), 2);
}

#[tokio::test]
async fn test_missing_rows_are_cached_too() {
    let (mut session, connection) = open();
    let id = Identifier::Long(404);

    assert!(session.get_database_snapshot("Book", &id).await.unwrap().is_none());
    assert!(session.get_database_snapshot("Book", &id).await.unwrap().is_none());

    assert_eq!(connection.selects(), 1);
}

#[tokio::test]
async fn test_without_caching_every_call_selects() {
    let connection = FakeConnection::new();
    let settings = SessionSettings {
        cache_database_snapshots: false,
        ..SessionSettings::default()
    };
    let mut session = factory_with(settings).open_session(connection.clone());
    let id = Identifier::Long(1);

    session.get_database_snapshot("Book", &id).await.unwrap();
    session.get_database_snapshot("Book", &id).await.unwrap();

    assert_eq!(connection.selects(), 2);
}

#[tokio::test]
async fn test_driver_failure_marks_session_rollback_only() {
    let (mut session, connection) = open();
    connection.fail_on("SELECT");

    let result = session
        .get_database_snapshot("Book", &Identifier::Long(1))
        .await;

    assert!(matches!(result, Err(ReposeError::Database { .. })));
    assert!(session.is_rollback_only());
}

#[tokio::test]
async fn test_unknown_entity_is_rejected() {
    let (mut session, _connection) = open();

    let result = session
        .get_database_snapshot("Spaceship", &Identifier::Long(1))
        .await;

    assert!(matches!(result, Err(ReposeError::UnknownEntity { .. })));
}
