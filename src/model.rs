//! Record types shared by the store, the ingestor and the backfill runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// Row identity of an archived file. Ascending in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArchiveId(pub i64);

impl fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// SHA-256 of a file's raw bytes; the dedup key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Conversion status of a record, stored as an integer column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionState {
    Pending,
    Succeeded,
    Failed,
}

impl ConversionState {
    pub fn as_i64(self) -> i64 {
        match self {
            ConversionState::Pending => 0,
            ConversionState::Succeeded => 1,
            ConversionState::Failed => 2,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(ConversionState::Pending),
            1 => Some(ConversionState::Succeeded),
            2 => Some(ConversionState::Failed),
            _ => None,
        }
    }
}

/// Source-side metadata captured at ingestion. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub full_path: PathBuf,
    pub file_name: String,
    /// Extension with its leading dot, as found on disk (`".DOCX"`), or empty.
    pub extension: String,
    pub size_bytes: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl FileMetadata {
    /// Metadata for bytes that did not come from a file on disk.
    pub fn named(file_name: impl Into<String>, size_bytes: u64) -> Self {
        let file_name = file_name.into();
        let extension = extension_of(&file_name);
        Self {
            full_path: PathBuf::from(&file_name),
            file_name,
            extension,
            size_bytes,
            created: None,
            modified: None,
        }
    }

    pub fn content_type(&self) -> Option<&'static str> {
        guess_content_type(&self.extension)
    }
}

/// Extension of `file_name` including the leading dot, or an empty string.
pub fn extension_of(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// Best-effort MIME type from an extension (with or without the dot).
pub fn guess_content_type(extension: &str) -> Option<&'static str> {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    let mime = match ext.as_str() {
        "txt" => "text/plain",
        "csv" => "text/csv",
        "rtf" => "application/rtf",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "odt" => "application/vnd.oasis.opendocument.text",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => return None,
    };
    Some(mime)
}

/// Result of [`crate::store::ContentStore::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inserted {
    pub id: ArchiveId,
    /// `false` when the bytes were already archived under `id`.
    pub created: bool,
}

/// What the backfill runner needs to convert one record.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub id: ArchiveId,
    pub file_name: String,
    pub extension: Option<String>,
    pub raw_bytes: Vec<u8>,
}

/// A full archive row.
#[derive(Debug, Clone)]
pub struct ArchiveRecord {
    pub id: ArchiveId,
    pub fingerprint: Fingerprint,
    pub metadata: FileMetadata,
    pub content_type: Option<String>,
    pub archived_at: DateTime<Utc>,
    pub raw_bytes: Vec<u8>,
    pub state: ConversionState,
    pub pdf_bytes: Option<Vec<u8>>,
    pub converted_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub attempts: u32,
}
