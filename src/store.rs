//! SQLite-backed content store.
//!
//! One table, `file_archive`, holds the original bytes of every archived
//! file keyed by the SHA-256 of its content, together with the PDF
//! conversion state. The connection lives behind an `Arc<Mutex<_>>`: the
//! store is `Send + Sync` and cheap to clone, and every clone shares the one
//! connection. Each public method takes the lock for a single statement or a
//! single transaction and releases it before returning, so callers never hold
//! it across a conversion.
//!
//! All methods block. Async callers run them on the blocking pool
//! (see [`crate::backfill`]).

use crate::error::{truncate_error, StoreError};
use crate::model::{
    ArchiveId, ArchiveRecord, ConversionState, FileMetadata, Fingerprint, Inserted,
    PendingRecord,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

pub const SCHEMA_VERSION: i64 = 1;

/// Which failed records are offered for another conversion attempt.
///
/// Pending records are always eligible. A failed record is eligible again
/// while its recorded attempts are below `max_attempts`, so `max_attempts = 1`
/// turns failures into a permanent poison queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl RetryPolicy {
    pub fn never() -> Self {
        Self { max_attempts: 1 }
    }
}

/// Row counts per conversion state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Clone)]
pub struct ContentStore {
    conn: Arc<Mutex<Connection>>,
    retry: RetryPolicy,
}

impl ContentStore {
    /// Open (creating if needed) the database at `path` and bring its schema
    /// up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            retry: RetryPolicy::default(),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Poison the connection lock, as a panic inside a store call would.
    #[cfg(test)]
    pub(crate) fn poison_for_test(&self) {
        let conn = Arc::clone(&self.conn);
        let _ = std::thread::spawn(move || {
            let _guard = conn.lock();
            panic!("store call panicked");
        })
        .join();
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        let current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchemaVersion {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let conn = self.lock()?;
            conn.execute_batch(include_str!("../migrations/0001_file_archive.sql"))?;
            conn.execute_batch("PRAGMA user_version = 1")?;
            debug!("Applied schema migration 1");
        }

        Ok(())
    }

    /// Version string of the linked SQLite library.
    pub fn sqlite_version(&self) -> Result<String, StoreError> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?)
    }

    /// Archive `raw_bytes`, or return the identity of the record that already
    /// holds the same content.
    ///
    /// Insert-or-ignore and the fingerprint lookup run in one IMMEDIATE
    /// transaction, so concurrent callers with identical bytes all observe the
    /// same single row.
    pub fn insert(&self, raw_bytes: &[u8], meta: &FileMetadata) -> Result<Inserted, StoreError> {
        let fingerprint = Fingerprint::of(raw_bytes);
        let extension = (!meta.extension.is_empty()).then_some(meta.extension.as_str());

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changes = tx.execute(
            "
            INSERT INTO file_archive (
                original_full_path,
                original_file_name,
                original_extension,
                content_type,
                file_size_bytes,
                file_created_utc,
                file_modified_utc,
                sha256,
                original_blob,
                archived_utc,
                pdf_status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)
            ON CONFLICT(sha256) DO NOTHING
            ",
            params![
                meta.full_path.to_string_lossy().into_owned(),
                meta.file_name,
                extension,
                meta.content_type(),
                raw_bytes.len() as i64,
                meta.created.map(|t| t.to_rfc3339()),
                meta.modified.map(|t| t.to_rfc3339()),
                &fingerprint.as_bytes()[..],
                raw_bytes,
                Utc::now().to_rfc3339(),
            ],
        )?;

        let id: i64 = tx.query_row(
            "SELECT id FROM file_archive WHERE sha256 = ?1 LIMIT 1",
            [&fingerprint.as_bytes()[..]],
            |row| row.get(0),
        )?;

        tx.commit()?;

        Ok(Inserted {
            id: ArchiveId(id),
            created: changes > 0,
        })
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM file_archive", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Number of records [`Self::list_pending`] would currently offer.
    pub fn pending_count(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "
            SELECT COUNT(*)
            FROM file_archive
            WHERE pdf_blob IS NULL
              AND (pdf_status = 0 OR (pdf_status = 2 AND pdf_attempts < ?1))
            ",
            [i64::from(self.retry.max_attempts)],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Up to `limit` records awaiting conversion, oldest first.
    pub fn list_pending(&self, limit: usize) -> Result<Vec<PendingRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "
            SELECT id, original_file_name, original_extension, original_blob
            FROM file_archive
            WHERE pdf_blob IS NULL
              AND (pdf_status = 0 OR (pdf_status = 2 AND pdf_attempts < ?1))
            ORDER BY id
            LIMIT ?2
            ",
        )?;

        let rows = stmt.query_map(
            params![
                i64::from(self.retry.max_attempts),
                i64::try_from(limit).unwrap_or(i64::MAX)
            ],
            |row| {
                Ok(PendingRecord {
                    id: ArchiveId(row.get(0)?),
                    file_name: row.get(1)?,
                    extension: row.get(2)?,
                    raw_bytes: row.get(3)?,
                })
            },
        )?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Store the PDF rendition and move the record to Succeeded.
    pub fn mark_succeeded(&self, id: ArchiveId, pdf_bytes: &[u8]) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changes = conn.execute(
            "
            UPDATE file_archive
            SET
                pdf_blob = ?2,
                pdf_converted_utc = ?3,
                pdf_status = ?4,
                pdf_error = NULL,
                pdf_attempts = pdf_attempts + 1
            WHERE id = ?1 AND pdf_status != ?4
            ",
            params![
                id.0,
                pdf_bytes,
                Utc::now().to_rfc3339(),
                ConversionState::Succeeded.as_i64()
            ],
        )?;

        if changes == 0 {
            return Err(explain_missed_update(&conn, id)?);
        }
        Ok(())
    }

    /// Record a failed conversion. The message is cut to
    /// [`crate::error::MAX_ERROR_CHARS`] characters.
    pub fn mark_failed(&self, id: ArchiveId, error: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changes = conn.execute(
            "
            UPDATE file_archive
            SET
                pdf_status = ?3,
                pdf_error = ?2,
                pdf_attempts = pdf_attempts + 1
            WHERE id = ?1 AND pdf_status != ?4
            ",
            params![
                id.0,
                truncate_error(error),
                ConversionState::Failed.as_i64(),
                ConversionState::Succeeded.as_i64()
            ],
        )?;

        if changes == 0 {
            return Err(explain_missed_update(&conn, id)?);
        }
        Ok(())
    }

    pub fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT pdf_status, COUNT(*) FROM file_archive GROUP BY pdf_status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, n) = row?;
            match ConversionState::from_i64(status) {
                Some(ConversionState::Pending) => counts.pending = n as u64,
                Some(ConversionState::Succeeded) => counts.succeeded = n as u64,
                Some(ConversionState::Failed) => counts.failed = n as u64,
                None => return Err(StoreError::UnknownState(status)),
            }
        }
        Ok(counts)
    }

    pub fn get(&self, id: ArchiveId) -> Result<Option<ArchiveRecord>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "
                SELECT
                    original_full_path,
                    original_file_name,
                    original_extension,
                    content_type,
                    file_size_bytes,
                    file_created_utc,
                    file_modified_utc,
                    sha256,
                    original_blob,
                    archived_utc,
                    pdf_status,
                    pdf_blob,
                    pdf_converted_utc,
                    pdf_error,
                    pdf_attempts
                FROM file_archive
                WHERE id = ?1
                ",
                [id.0],
                |row| {
                    Ok(RawRow {
                        full_path: row.get(0)?,
                        file_name: row.get(1)?,
                        extension: row.get(2)?,
                        content_type: row.get(3)?,
                        size_bytes: row.get(4)?,
                        created: row.get(5)?,
                        modified: row.get(6)?,
                        sha256: row.get(7)?,
                        raw_bytes: row.get(8)?,
                        archived: row.get(9)?,
                        status: row.get(10)?,
                        pdf_bytes: row.get(11)?,
                        converted: row.get(12)?,
                        error: row.get(13)?,
                        attempts: row.get(14)?,
                    })
                },
            )
            .optional()?;

        row.map(|raw| raw.into_record(id)).transpose()
    }
}

/// Why an `UPDATE … WHERE id = ? AND pdf_status != 1` touched nothing.
fn explain_missed_update(conn: &Connection, id: ArchiveId) -> Result<StoreError, StoreError> {
    let status: Option<i64> = conn
        .query_row(
            "SELECT pdf_status FROM file_archive WHERE id = ?1",
            [id.0],
            |row| row.get(0),
        )
        .optional()?;
    Ok(match status {
        None => StoreError::NotFound(id.0),
        Some(_) => StoreError::AlreadySucceeded(id.0),
    })
}

struct RawRow {
    full_path: String,
    file_name: String,
    extension: Option<String>,
    content_type: Option<String>,
    size_bytes: i64,
    created: Option<String>,
    modified: Option<String>,
    sha256: Vec<u8>,
    raw_bytes: Vec<u8>,
    archived: String,
    status: i64,
    pdf_bytes: Option<Vec<u8>>,
    converted: Option<String>,
    error: Option<String>,
    attempts: i64,
}

impl RawRow {
    fn into_record(self, id: ArchiveId) -> Result<ArchiveRecord, StoreError> {
        let fingerprint = Fingerprint::from_slice(&self.sha256)
            .ok_or_else(|| StoreError::CorruptRow(format!("bad sha256 length on record {id}")))?;
        let state =
            ConversionState::from_i64(self.status).ok_or(StoreError::UnknownState(self.status))?;

        Ok(ArchiveRecord {
            id,
            fingerprint,
            metadata: FileMetadata {
                full_path: PathBuf::from(self.full_path),
                file_name: self.file_name,
                extension: self.extension.unwrap_or_default(),
                size_bytes: self.size_bytes as u64,
                created: self.created.as_deref().map(parse_ts).transpose()?,
                modified: self.modified.as_deref().map(parse_ts).transpose()?,
            },
            content_type: self.content_type,
            archived_at: parse_ts(&self.archived)?,
            raw_bytes: self.raw_bytes,
            state,
            pdf_bytes: self.pdf_bytes,
            converted_at: self.converted.as_deref().map(parse_ts).transpose()?,
            error: self.error,
            attempts: self.attempts as u32,
        })
    }
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| StoreError::Timestamp(format!("{value}: {err}")))
}
