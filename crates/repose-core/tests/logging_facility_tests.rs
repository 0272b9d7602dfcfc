#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::FakeConnection;
use repose_core::core_types::schema::{EVENT_END, EVENT_END_ERROR, EVENT_START};
use repose_core::core_types::{RequestContext, RequestId};
use repose_core::errors::ReposeError;
use repose_core::logging_facility::init_test_capture;
use repose_core::model::EntityRef;
use repose_core::{log_op_end, log_op_error, log_op_start, Session};

fn session_with_request_id(request_id: &str) -> Session {
    common::factory()
        .session_builder(FakeConnection::new())
        .request_context(RequestContext::with_request_id(RequestId::from_string(
            request_id.to_string(),
        )))
        .open()
}

#[test]
fn test_log_op_start_macro() {
    let capture = init_test_capture();
    let op_name = "test_log_op_start_unique_1";

    log_op_start!(op_name, entity_name = "Book");

    let events = capture.events_for_op(op_name);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event.as_deref(), Some(EVENT_START));
    assert_eq!(events[0].field("entity_name"), Some("Book"));
}

#[test]
fn test_log_op_end_macro() {
    let capture = init_test_capture();
    let op_name = "test_log_op_end_unique_2";

    log_op_end!(op_name, duration_ms = 42);

    let end_events: Vec<_> = capture
        .events_for_op(op_name)
        .into_iter()
        .filter(|e| e.event.as_deref() == Some(EVENT_END))
        .collect();
    assert_eq!(end_events.len(), 1, "Should have exactly one end event");
    assert_eq!(end_events[0].field("duration_ms"), Some("42"));
}

#[test]
fn test_log_op_error_includes_kind_and_code() {
    let capture = init_test_capture();
    let op_name = "test_log_op_error_unique_3";

    let err = ReposeError::NonUniqueObject {
        entity_name: "Book".to_string(),
        id: "3".to_string(),
    };
    log_op_error!(op_name, err, duration_ms = 10);

    let error_events: Vec<_> = capture
        .events_for_op(op_name)
        .into_iter()
        .filter(|e| e.event.as_deref() == Some(EVENT_END_ERROR))
        .collect();
    assert_eq!(error_events.len(), 1, "Should have exactly one error event");
    assert_eq!(error_events[0].field("err_code"), Some("ERR_NON_UNIQUE_OBJECT"));
    assert_eq!(error_events[0].level, tracing::Level::ERROR);
    assert!(error_events[0]
        .field("err_message")
        .is_some_and(|m| m.contains("Book#3")));
}

#[tokio::test]
async fn test_session_operation_logs_start_and_end() {
    // GIVEN a session with a known request id
    let capture = init_test_capture();
    let mut session = session_with_request_id("req-logging-persist");

    // WHEN persisting
    session
        .persist(&EntityRef::new("Book").with_id(1))
        .await
        .unwrap();

    // THEN exactly one end event carries the request id and entity
    let ends = capture.count_events(|e| {
        e.op.as_deref() == Some("persist")
            && e.event.as_deref() == Some(EVENT_END)
            && e.field("request_id") == Some("req-logging-persist")
            && e.field("entity_name") == Some("Book")
    });
    assert_eq!(ends, 1);
    capture.assert_event_exists("persist", EVENT_START);
}

#[tokio::test]
async fn test_failed_operation_logs_error_event() {
    // GIVEN a Book#3 already saved in this session
    let capture = init_test_capture();
    let mut session = session_with_request_id("req-logging-conflict");
    session
        .save(&EntityRef::new("Book").with_id(3))
        .await
        .unwrap();

    // WHEN saving a twin
    let result = session.save(&EntityRef::new("Book").with_id(3)).await;

    // THEN the failure is logged once with the stable code
    assert!(result.is_err());
    let errors: Vec<_> = capture
        .events_for_op("save")
        .into_iter()
        .filter(|e| {
            e.event.as_deref() == Some(EVENT_END_ERROR)
                && e.field("request_id") == Some("req-logging-conflict")
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field("err_code"), Some("ERR_NON_UNIQUE_OBJECT"));
    assert_eq!(errors[0].field("entity_name"), Some("Book"));
}

#[tokio::test]
async fn test_flush_logs_executed_statements() {
    // GIVEN a persisted book with a title only this test uses
    let capture = init_test_capture();
    let mut session = session_with_request_id("req-logging-flush");
    session
        .persist(&EntityRef::new("Book").with_id(77).with("title", "Logged"))
        .await
        .unwrap();

    // WHEN flushing
    session.flush().await.unwrap();

    // THEN the insert statement was logged and flush closed cleanly
    assert!(capture
        .statements()
        .iter()
        .any(|sql| sql.starts_with("INSERT INTO \"books\"")));
    let flush_ends = capture.count_events(|e| {
        e.is("flush", EVENT_END) && e.field("request_id") == Some("req-logging-flush")
    });
    assert_eq!(flush_ends, 1);
}
