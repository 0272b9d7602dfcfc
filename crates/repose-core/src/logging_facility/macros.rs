//! Canonical logging macros
//!
//! Every session operation logs a `start` and an `end` (or `end_error`)
//! event carrying the same `op` name. Extra `key = value` fields are passed
//! through to `tracing` unchanged.

#[doc(hidden)]
#[macro_export]
macro_rules! __log_op_event {
    ($level:ident, $op:expr, $event:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = module_path!(),
            op = $op,
            event = $event,
            $($($field)*)?
        )
    };
}

/// Log the start of an operation
///
/// ```
/// # use repose_core::log_op_start;
/// log_op_start!("persist");
/// log_op_start!("persist", entity_name = "Book");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr $(, $($field:tt)*)?) => {
        $crate::__log_op_event!(
            info,
            $op,
            $crate::core_types::schema::EVENT_START
            $(, $($field)*)?
        )
    };
}

/// Log the successful end of an operation; `duration_ms` is mandatory
///
/// ```
/// # use repose_core::log_op_end;
/// log_op_end!("flush", duration_ms = 3, entity_count = 2);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {
        $crate::__log_op_event!(
            info,
            $op,
            $crate::core_types::schema::EVENT_END,
            duration_ms = $duration
            $(, $($field)*)?
        )
    };
}

/// Log the failure of an operation
///
/// Anything convertible into [`ExError`](crate::errors::ExError) is
/// accepted; the event carries its kind, stable code and message.
///
/// ```
/// # use repose_core::{log_op_error, errors::ReposeError};
/// let err = ReposeError::NullIdentifier { entity_name: "Book".to_string() };
/// log_op_error!("persist", err, duration_ms = 1, entity_name = "Book");
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {{
        let ex_err: $crate::errors::ExError = $err.into();
        $crate::__log_op_event!(
            error,
            $op,
            $crate::core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err_kind = ?ex_err.kind(),
            err_code = ex_err.code(),
            err_message = ex_err.message()
            $(, $($field)*)?
        )
    }};
}
