//! Log subsystem errors
//!
//! Error codes:
//! - FERRO_LOG_APPEND_FAILED (ERROR severity)
//! - FERRO_LOG_PAGE_FETCH_FAILED (FATAL severity)
//! - FERRO_LOG_CHECKSUM_MISMATCH (FATAL severity)
//! - FERRO_LOG_FLUSH_FAILED (FATAL severity)
//! - FERRO_LOG_ARCHIVE_FAILED (ERROR severity)
//!
//! The FATAL codes are the conditions under which the engine can no longer
//! reason about its own log: a gap in the stream, corrupted stable storage
//! or a failed durability write. They all route through [`LogError::fatal`],
//! which emits a structured FATAL event before surfacing the error, since
//! the caller is expected to terminate the process.

use std::fmt;
use std::io;

use crate::observability::{Logger, Severity as LogSeverity};

/// Severity levels for log errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, engine continues
    Error,
    /// Engine must terminate
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Log-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogErrorCode {
    /// Record could not be staged or appended
    FerroLogAppendFailed,
    /// A page required to reason about the log could not be fetched
    FerroLogPageFetchFailed,
    /// Page checksum validation failed
    FerroLogChecksumMismatch,
    /// Flush I/O failed; the durability contract is broken
    FerroLogFlushFailed,
    /// Archive rotation or archive read failed
    FerroLogArchiveFailed,
}

impl LogErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            LogErrorCode::FerroLogAppendFailed => "FERRO_LOG_APPEND_FAILED",
            LogErrorCode::FerroLogPageFetchFailed => "FERRO_LOG_PAGE_FETCH_FAILED",
            LogErrorCode::FerroLogChecksumMismatch => "FERRO_LOG_CHECKSUM_MISMATCH",
            LogErrorCode::FerroLogFlushFailed => "FERRO_LOG_FLUSH_FAILED",
            LogErrorCode::FerroLogArchiveFailed => "FERRO_LOG_ARCHIVE_FAILED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            LogErrorCode::FerroLogAppendFailed => Severity::Error,
            LogErrorCode::FerroLogPageFetchFailed => Severity::Fatal,
            LogErrorCode::FerroLogChecksumMismatch => Severity::Fatal,
            LogErrorCode::FerroLogFlushFailed => Severity::Fatal,
            LogErrorCode::FerroLogArchiveFailed => Severity::Error,
        }
    }
}

impl fmt::Display for LogErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Log error with full context.
#[derive(Debug)]
pub struct LogError {
    code: LogErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl LogError {
    pub fn append_failed(message: impl Into<String>) -> Self {
        Self {
            code: LogErrorCode::FerroLogAppendFailed,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn page_fetch_failed(page_id: i64, message: impl Into<String>) -> Self {
        Self {
            code: LogErrorCode::FerroLogPageFetchFailed,
            message: message.into(),
            details: Some(format!("page_id: {}", page_id)),
            source: None,
        }
    }

    pub fn checksum_mismatch(page_id: i64, computed: u32, stored: u32) -> Self {
        Self {
            code: LogErrorCode::FerroLogChecksumMismatch,
            message: format!(
                "checksum mismatch: computed {:08x}, stored {:08x}",
                computed, stored
            ),
            details: Some(format!("page_id: {}", page_id)),
            source: None,
        }
    }

    pub fn flush_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: LogErrorCode::FerroLogFlushFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    pub fn archive_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: LogErrorCode::FerroLogArchiveFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    pub fn code(&self) -> LogErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// True when the engine must terminate rather than continue.
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// The single fatal-error path: log a structured FATAL event with the
    /// failing context, then hand the error back for propagation. Callers
    /// at the operation surface treat a fatal error as a termination
    /// request; continuing would silently corrupt the log's total order.
    pub fn fatal(context: &str, error: LogError) -> LogError {
        Logger::log_stderr(
            LogSeverity::Fatal,
            "log_fatal_error",
            &[
                ("context", context),
                ("code", error.code.code()),
                ("message", error.message()),
                ("details", error.details().unwrap_or("")),
            ],
        );
        error
    }
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;
