//! Error types for the pdfvault library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`VaultError`]: **Fatal**: the run cannot proceed (bad configuration,
//!   database unreachable). Returned from the top-level entry points.
//!
//! * [`StoreError`]: a single storage operation failed. Ingestion and
//!   backfill isolate these per item unless [`StoreError::is_connection_loss`]
//!   says the database itself is gone, in which case the run is aborted.
//!
//! * [`ConvertError`]: **Per record**: one conversion failed. The backfill
//!   runner records it as a failed conversion, except for
//!   [`ConvertError::ExecutableNotFound`], which leaves the record pending.

use std::path::PathBuf;
use thiserror::Error;

/// Maximum length, in characters, of an error message stored on a record.
pub const MAX_ERROR_CHARS: usize = 2000;

/// All fatal errors returned by the pdfvault library.
#[derive(Debug, Error)]
pub enum VaultError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Settings failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The settings file could not be read.
    #[error("Failed to read settings file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON for [`crate::config::AppSettings`].
    #[error("Failed to parse settings file '{path}': {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // ── Storage errors ────────────────────────────────────────────────────
    #[error(transparent)]
    Store(#[from] StoreError),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// A directory the run depends on could not be created or listed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The report could not be delivered.
    #[error("Failed to send report: {0}")]
    Notify(String),
}

/// Errors from the SQLite-backed content store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("archive record {0} does not exist")]
    NotFound(i64),

    /// A terminal success is final; nothing may overwrite it.
    #[error("archive record {0} already has a PDF rendition")]
    AlreadySucceeded(i64),

    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },

    #[error("cannot create database directory '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timestamp parse error: {0}")]
    Timestamp(String),

    /// A stored value does not have the shape this schema requires.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("unknown conversion state {0}")]
    UnknownState(i64),

    /// A previous holder of the connection panicked.
    #[error("store connection lock poisoned")]
    Poisoned,

    /// A store call on the blocking pool panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// `true` when the database is unusable for the rest of the run, as
    /// opposed to a failure scoped to one row.
    pub fn is_connection_loss(&self) -> bool {
        use rusqlite::ErrorCode;
        match self {
            StoreError::Poisoned | StoreError::Task(_) => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::NotADatabase
                    | ErrorCode::DatabaseCorrupt
                    | ErrorCode::DiskFull
                    | ErrorCode::ReadOnly
            ),
            _ => false,
        }
    }
}

/// A non-fatal error for a single conversion.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The converter executable does not resolve. Expected while LibreOffice
    /// is not installed; the record stays pending for a later run.
    #[error("Converter executable not found: '{}'", path.display())]
    ExecutableNotFound { path: PathBuf },

    /// The executable exists but the process could not be started.
    #[error("Failed to start converter '{}': {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The converter exited with a non-zero status.
    #[error(
        "LibreOffice conversion failed (exit {}).\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}",
        exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string())
    )]
    ProcessFailed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The converter reported success but left no PDF behind.
    #[error("LibreOffice reported success but no PDF was produced.\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}")]
    NoOutputProduced { stdout: String, stderr: String },

    /// The converter did not finish in time and was killed.
    #[error("LibreOffice conversion timed out after {secs} seconds")]
    Timeout { secs: u64 },

    /// Creating, writing or reading the working directory failed.
    #[error("Working directory error: {0}")]
    WorkArea(#[source] std::io::Error),
}

impl ConvertError {
    /// `true` for the "converter not installed" category, which must not be
    /// recorded as a failed conversion.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ConvertError::ExecutableNotFound { .. })
    }
}

/// Truncate `message` to [`MAX_ERROR_CHARS`] characters (not bytes).
pub fn truncate_error(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_CHARS) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_failed_display() {
        let e = ConvertError::ProcessFailed {
            exit_code: Some(81),
            stdout: "out".into(),
            stderr: "bad input".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("exit 81"), "got: {msg}");
        assert!(msg.contains("bad input"));
    }

    #[test]
    fn process_killed_by_signal_display() {
        let e = ConvertError::ProcessFailed {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(e.to_string().contains("exit signal"));
    }

    #[test]
    fn only_missing_executable_is_unavailable() {
        assert!(ConvertError::ExecutableNotFound {
            path: "soffice".into()
        }
        .is_unavailable());
        assert!(!ConvertError::Timeout { secs: 60 }.is_unavailable());
        assert!(!ConvertError::NoOutputProduced {
            stdout: String::new(),
            stderr: String::new()
        }
        .is_unavailable());
    }

    #[test]
    fn timeout_display() {
        let e = ConvertError::Timeout { secs: 5 };
        assert!(e.to_string().contains("5 seconds"));
    }

    #[test]
    fn truncate_counts_characters() {
        let long = "é".repeat(MAX_ERROR_CHARS + 10);
        let cut = truncate_error(&long);
        assert_eq!(cut.chars().count(), MAX_ERROR_CHARS);
        assert_eq!(truncate_error("short"), "short");
    }

    #[test]
    fn row_errors_are_not_connection_loss() {
        assert!(!StoreError::NotFound(7).is_connection_loss());
        assert!(!StoreError::AlreadySucceeded(7).is_connection_loss());
        assert!(StoreError::Poisoned.is_connection_loss());
        assert!(StoreError::Task("panicked".into()).is_connection_loss());
    }
}
