//! # pdfvault
//!
//! Archive files into a content-addressed SQLite store and backfill a PDF
//! rendition of each one with headless LibreOffice.
//!
//! ## Pipeline Overview
//!
//! ```text
//! watch dir
//!  │
//!  ├─ 1. Ingest    read each file, SHA-256 it, insert-or-find in the store
//!  ├─ 2. Queue     records without a PDF, oldest first, bounded batch
//!  ├─ 3. Convert   soffice --convert-to pdf in an isolated temp dir, with timeout
//!  ├─ 4. Record    Succeeded (PDF stored) / Failed (error stored) / left pending
//!  └─ 5. Report    counts + file lists, optionally e-mailed
//! ```
//!
//! Identical bytes are stored once no matter how many times or under which
//! names they arrive. Every run picks up where the previous one stopped: a
//! record that already has its PDF is never converted again, and a record
//! whose conversion was skipped because LibreOffice is not installed stays
//! queued.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfvault::{
//!     ingest_directory, BackfillRunner, ContentStore, ConverterConfig, SofficeConverter,
//! };
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = ContentStore::open("Data/pdfvault.db")?;
//!     let ingested = ingest_directory(&store, Path::new("InboundFiles"), false)?;
//!
//!     let soffice = soffice_locate::locate(None);
//!     let config = ConverterConfig::builder().soffice_path(soffice.path).build()?;
//!     let report = BackfillRunner::new(&store, SofficeConverter::new(config))
//!         .run(50)
//!         .await?;
//!
//!     println!(
//!         "ingested {}, converted {}, failed {}",
//!         ingested.success_count(),
//!         report.success_count(),
//!         report.failure_count()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfvault` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `email` | on      | SMTP delivery of the run report via lettre |
//!
//! Disable both when using only the library:
//! ```toml
//! pdfvault = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backfill;
pub mod config;
pub mod convert;
pub mod error;
pub mod ingest;
pub mod model;
#[cfg(feature = "email")]
pub mod notify;
pub mod progress;
pub mod report;
pub mod source;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backfill::{BackfillReport, BackfillRunner, FailedRecord, RecordRef};
pub use config::{AppSettings, EmailSettings, SecureSocket};
pub use convert::{normalize_extension, ConverterConfig, ConverterConfigBuilder, PdfConverter, SofficeConverter};
pub use error::{ConvertError, StoreError, VaultError};
pub use ingest::{ingest_directory, ingest_files, IngestReport};
pub use model::{ArchiveId, ArchiveRecord, ConversionState, FileMetadata, Fingerprint, Inserted, PendingRecord};
#[cfg(feature = "email")]
pub use notify::Mailer;
pub use progress::{BackfillProgress, NoopProgress, ProgressCallback};
pub use report::RunSummary;
pub use source::{list_files, SourceFile};
pub use store::{ContentStore, RetryPolicy, StatusCounts};
