//! Directory ingestion into the content store.

use crate::error::VaultError;
use crate::model::ArchiveId;
use crate::source::{list_files, SourceFile};
use crate::store::ContentStore;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Which step of ingesting a single file failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Read,
    Insert,
    Delete,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub path: PathBuf,
    pub stage: IngestStage,
    pub message: String,
}

/// Outcome of one [`ingest_directory`] pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub files_found: usize,
    /// Files whose bytes created a new record.
    pub inserted: usize,
    /// Files whose bytes were already archived.
    pub duplicates: usize,
    /// Source files removed after a confirmed insert.
    pub deleted: usize,
    /// Identity of every successfully stored file, in processing order.
    pub ids: Vec<ArchiveId>,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    /// Files that reached the store, new or duplicate. A failed delete after
    /// a successful insert still counts.
    pub fn success_count(&self) -> usize {
        self.inserted + self.duplicates
    }
}

/// Archive every regular file directly under `source_dir`.
///
/// Each file is handled on its own: a read, insert or delete failure is
/// logged and recorded in the report and the next file is processed. Only a
/// store error that means the database is gone aborts the pass. A missing
/// directory yields an empty report.
///
/// With `delete_after_insert`, a source file is removed only after the store
/// has returned its identity.
pub fn ingest_directory(
    store: &ContentStore,
    source_dir: &Path,
    delete_after_insert: bool,
) -> Result<IngestReport, VaultError> {
    let files = match list_files(source_dir) {
        Ok(files) => files,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("Source directory does not exist: {}", source_dir.display());
            return Ok(IngestReport::default());
        }
        Err(source) => {
            return Err(VaultError::Io {
                path: source_dir.to_path_buf(),
                source,
            })
        }
    };

    if files.is_empty() {
        info!("No files found in {}", source_dir.display());
        return Ok(IngestReport::default());
    }
    info!("Found {} file(s) in {}", files.len(), source_dir.display());

    ingest_files(store, &files, delete_after_insert)
}

/// Archive an already listed set of files, in order. Same per-file rules as
/// [`ingest_directory`].
pub fn ingest_files(
    store: &ContentStore,
    files: &[SourceFile],
    delete_after_insert: bool,
) -> Result<IngestReport, VaultError> {
    let mut report = IngestReport {
        files_found: files.len(),
        ..Default::default()
    };

    for file in files {
        ingest_one(store, file, delete_after_insert, &mut report)?;
    }

    info!(
        "Ingest complete: {}/{} stored ({} new, {} duplicate, {} failed)",
        report.success_count(),
        report.files_found,
        report.inserted,
        report.duplicates,
        report.failures.len()
    );
    Ok(report)
}

fn ingest_one(
    store: &ContentStore,
    file: &SourceFile,
    delete_after_insert: bool,
    report: &mut IngestReport,
) -> Result<(), VaultError> {
    let bytes = match std::fs::read(&file.path) {
        Ok(b) => b,
        Err(e) => {
            warn!(file = %file.name, "Read failed: {}", e);
            report.failures.push(IngestFailure {
                path: file.path.clone(),
                stage: IngestStage::Read,
                message: e.to_string(),
            });
            return Ok(());
        }
    };

    let inserted = match store.insert(&bytes, &file.metadata(bytes.len() as u64)) {
        Ok(i) => i,
        Err(e) if e.is_connection_loss() => {
            error!(file = %file.name, "Store unavailable, aborting ingest: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            warn!(file = %file.name, "Insert failed: {}", e);
            report.failures.push(IngestFailure {
                path: file.path.clone(),
                stage: IngestStage::Insert,
                message: e.to_string(),
            });
            return Ok(());
        }
    };

    if inserted.created {
        report.inserted += 1;
        info!(id = %inserted.id, file = %file.name, size = bytes.len(), "Archived");
    } else {
        report.duplicates += 1;
        info!(id = %inserted.id, file = %file.name, "Already archived");
    }
    report.ids.push(inserted.id);

    if delete_after_insert {
        match std::fs::remove_file(&file.path) {
            Ok(()) => {
                report.deleted += 1;
                debug!(id = %inserted.id, "Deleted source {}", file.path.display());
            }
            Err(e) => {
                warn!(id = %inserted.id, file = %file.name, "Delete failed: {}", e);
                report.failures.push(IngestFailure {
                    path: file.path.clone(),
                    stage: IngestStage::Delete,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(())
}
