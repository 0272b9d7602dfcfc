//! Canonical schema constants for structured logging
//!
//! Field keys and event names shared by the logging macros, the error
//! facility and tests that assert on captured events.

pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_REQUEST_ID: &str = "request_id";

// Entity identification
pub const FIELD_ENTITY_NAME: &str = "entity_name";
pub const FIELD_ENTITY_ID: &str = "entity_id";

// Pipeline detail
pub const FIELD_ACTION_KIND: &str = "action_kind";
pub const FIELD_CASCADE_POINT: &str = "cascade_point";
pub const FIELD_SQL: &str = "sql";
pub const FIELD_ROWS: &str = "rows";

// Error fields
pub const FIELD_ERR_KIND: &str = "err_kind";
pub const FIELD_ERR_CODE: &str = "err_code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
