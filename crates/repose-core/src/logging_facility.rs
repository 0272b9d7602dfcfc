//! Structured logging for sessions and stores
//!
//! Session operations (`persist`, `merge`, `flush`, ...) emit a `start` and
//! an `end`/`end_error` event through the `log_op_*` macros; the action
//! queue logs each statement at `debug` and each submitted action at
//! `trace`. Binaries call [`init`] (or [`init_with_filter`]) once with the
//! configured [`Profile`]; tests install [`init_test_capture`] instead.
//!
//! ```rust
//! use repose_core::logging_facility::{init_with_filter, Profile};
//!
//! init_with_filter(Profile::Production, Some("repose_core=debug"));
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, init_with_filter, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
