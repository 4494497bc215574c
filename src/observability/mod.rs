//! Structured logging for the log core
//!
//! - Structured logs (JSON), one line per event
//! - Deterministic key ordering
//! - Explicit severity levels, synchronous, no buffering
//!
//! The fatal-error path (`log::errors`) emits a FATAL event here before
//! surfacing the error, so diagnostics survive even when the process is
//! about to terminate.

mod logger;

pub use logger::{Logger, Severity};
