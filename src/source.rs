//! Source directory enumeration.
//!
//! Lists the regular files directly inside a directory together with the
//! metadata the archive keeps about each one. Subdirectories, and anything
//! that is not a plain file, are ignored.

use crate::model::{extension_of, FileMetadata};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// A file found in the source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub name: String,
    /// Extension with its leading dot, or empty.
    pub extension: String,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl SourceFile {
    /// Metadata recorded with the archived bytes.
    ///
    /// `size_bytes` is the length actually read, which can differ from the
    /// size seen at listing time if the file changed in between.
    pub fn metadata(&self, size_bytes: u64) -> FileMetadata {
        FileMetadata {
            full_path: self.path.clone(),
            file_name: self.name.clone(),
            extension: self.extension.clone(),
            size_bytes,
            created: self.created,
            modified: self.modified,
        }
    }
}

/// Regular files directly under `dir`, sorted by file name.
///
/// Entries whose metadata cannot be read are skipped with a debug log; an
/// error is returned only if the directory itself cannot be listed.
pub fn list_files(dir: &Path) -> io::Result<Vec<SourceFile>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };

        // Follows symlinks, so a link to a regular file counts as one.
        let meta = match fs::metadata(entry.path()) {
            Ok(m) => m,
            Err(e) => {
                debug!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };
        if !meta.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        files.push(SourceFile {
            extension: extension_of(&name),
            path: entry.path(),
            name,
            size: meta.len(),
            created: meta.created().ok().map(to_utc),
            modified: meta.modified().ok().map(to_utc),
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn to_utc(t: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}
