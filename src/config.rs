//! Run configuration loaded from a JSON settings file.
//!
//! [`AppSettings`] mirrors the file layout: one section each for the
//! database, ingestion, PDF conversion and e-mail. Every field has a default,
//! so a partial file (or none at all) is valid.
//!
//! # Paths
//! Relative paths are resolved against the directory containing the settings
//! file, not the current working directory, so a scheduled run finds the same
//! database regardless of where it was started from.
//!
//! # Example
//! ```json
//! {
//!   "database": { "path": "Data/pdfvault.db" },
//!   "ingest":   { "watch_path": "InboundFiles", "delete_after_insert": true },
//!   "pdf":      { "timeout_seconds": 120, "batch_limit": 50 },
//!   "email":    { "enabled": false }
//! }
//! ```

use crate::backfill::DEFAULT_BATCH_LIMIT;
use crate::convert::{ConverterConfig, DEFAULT_TIMEOUT_SECS};
use crate::error::VaultError;
use crate::store::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_SETTINGS_FILE: &str = "appsettings.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub database: DatabaseSettings,
    pub ingest: IngestSettings,
    pub pdf: PdfSettings,
    pub email: EmailSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite database file. Its parent directory is created on demand.
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("Data").join("pdfvault.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Directory scanned for new files (top level only).
    pub watch_path: PathBuf,
    /// Remove each source file once its bytes are in the store.
    pub delete_after_insert: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            watch_path: PathBuf::from("InboundFiles"),
            delete_after_insert: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfSettings {
    /// Explicit `soffice` executable. When unset it is discovered.
    pub soffice_path: Option<PathBuf>,
    /// Parent of the per-conversion working directories.
    pub temp_path: PathBuf,
    pub timeout_seconds: u64,
    /// Records converted per run.
    pub batch_limit: usize,
    /// Conversions in flight at once.
    pub concurrency: usize,
    /// Conversion attempts before a failed record stops being retried.
    pub max_attempts: u32,
}

impl Default for PdfSettings {
    fn default() -> Self {
        Self {
            soffice_path: None,
            temp_path: PathBuf::from("Temp").join("pdfvault"),
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            batch_limit: DEFAULT_BATCH_LIMIT,
            concurrency: 1,
            max_attempts: RetryPolicy::default().max_attempts,
        }
    }
}

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecureSocket {
    /// Plain SMTP.
    #[default]
    None,
    /// Upgrade with STARTTLS (typically port 587).
    StartTls,
    /// Implicit TLS from the first byte (typically port 465).
    SslOnConnect,
}

impl FromStr for SecureSocket {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(SecureSocket::None),
            "starttls" => Ok(SecureSocket::StartTls),
            "sslonconnect" => Ok(SecureSocket::SslOnConnect),
            _ => Err(VaultError::InvalidConfig(format!(
                "Invalid email.secure_socket value '{s}'. Use None, StartTls, or SslOnConnect."
            ))),
        }
    }
}

impl fmt::Display for SecureSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecureSocket::None => f.write_str("None"),
            SecureSocket::StartTls => f.write_str("StartTls"),
            SecureSocket::SslOnConnect => f.write_str("SslOnConnect"),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    /// `None`, `StartTls` or `SslOnConnect` (case-insensitive).
    pub secure_socket: String,
    /// Some relays reject AUTH, others require it.
    pub require_auth: bool,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub from_name: String,
    /// SMTP `MAIL FROM`; defaults to `from_address`.
    pub envelope_from: String,
    pub to: Vec<String>,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: 25,
            secure_socket: "None".into(),
            require_auth: false,
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            from_name: "pdfvault".into(),
            envelope_from: String::new(),
            to: Vec::new(),
        }
    }
}

impl fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailSettings")
            .field("enabled", &self.enabled)
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("secure_socket", &self.secure_socket)
            .field("require_auth", &self.require_auth)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from_address", &self.from_address)
            .field("from_name", &self.from_name)
            .field("envelope_from", &self.envelope_from)
            .field("to", &self.to)
            .finish()
    }
}

impl EmailSettings {
    pub fn secure_socket(&self) -> Result<SecureSocket, VaultError> {
        self.secure_socket.parse()
    }

    /// Recipients with blank entries dropped.
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to.iter().map(|s| s.trim()).filter(|s| !s.is_empty())
    }

    pub fn envelope_sender(&self) -> &str {
        if self.envelope_from.trim().is_empty() {
            &self.from_address
        } else {
            &self.envelope_from
        }
    }

    fn validate(&self) -> Result<(), VaultError> {
        self.secure_socket()?;
        if !self.enabled {
            return Ok(());
        }
        if self.smtp_host.trim().is_empty() {
            return Err(invalid("email.smtp_host is required when email is enabled"));
        }
        if self.from_address.trim().is_empty() {
            return Err(invalid("email.from_address is required when email is enabled"));
        }
        if self.recipients().next().is_none() {
            return Err(invalid("email.to must list at least one recipient"));
        }
        if self.require_auth && self.username.trim().is_empty() {
            return Err(invalid(
                "email.require_auth is true but email.username is empty",
            ));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> VaultError {
    VaultError::InvalidConfig(msg.to_string())
}

impl AppSettings {
    /// Read, parse and path-resolve a settings file. Does not validate.
    pub fn load(path: &Path) -> Result<Self, VaultError> {
        let text = std::fs::read_to_string(path).map_err(|source| VaultError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings: AppSettings =
            serde_json::from_str(&text).map_err(|source| VaultError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        settings.resolve_paths(&base_dir(path));
        Ok(settings)
    }

    /// Like [`Self::load`], but a missing file yields defaults resolved
    /// against the file's directory.
    pub fn load_or_default(path: &Path) -> Result<Self, VaultError> {
        if path.exists() {
            return Self::load(path);
        }
        let mut settings = Self::default();
        settings.resolve_paths(&base_dir(path));
        Ok(settings)
    }

    /// Make every relative path absolute against `base`.
    ///
    /// A bare executable name in `pdf.soffice_path` is left alone so it is
    /// still looked up on `PATH`.
    pub fn resolve_paths(&mut self, base: &Path) {
        resolve(&mut self.database.path, base);
        resolve(&mut self.ingest.watch_path, base);
        resolve(&mut self.pdf.temp_path, base);
        if let Some(soffice) = self.pdf.soffice_path.as_mut() {
            let has_dir = soffice.parent().is_some_and(|p| !p.as_os_str().is_empty());
            if has_dir {
                resolve(soffice, base);
            }
        }
    }

    /// Check every value the run depends on.
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.database.path.as_os_str().is_empty() {
            return Err(invalid("database.path must not be empty"));
        }
        if self.pdf.timeout_seconds == 0 {
            return Err(invalid("pdf.timeout_seconds must be ≥ 1"));
        }
        if self.pdf.batch_limit == 0 {
            return Err(invalid("pdf.batch_limit must be ≥ 1"));
        }
        if self.pdf.concurrency == 0 {
            return Err(invalid("pdf.concurrency must be ≥ 1"));
        }
        if self.pdf.max_attempts == 0 {
            return Err(invalid("pdf.max_attempts must be ≥ 1"));
        }
        self.email.validate()
    }

    /// Create the database parent, watch and temp directories.
    pub fn prepare_dirs(&self) -> Result<(), VaultError> {
        let db_parent = self
            .database
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty());
        for dir in db_parent
            .into_iter()
            .chain([self.ingest.watch_path.as_path(), self.pdf.temp_path.as_path()])
        {
            std::fs::create_dir_all(dir).map_err(|source| VaultError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.pdf.max_attempts,
        }
    }

    /// Converter settings for an already located `soffice`.
    pub fn converter_config(&self, soffice: impl Into<PathBuf>) -> Result<ConverterConfig, VaultError> {
        ConverterConfig::builder()
            .soffice_path(soffice)
            .temp_root(&self.pdf.temp_path)
            .timeout_secs(self.pdf.timeout_seconds)
            .build()
    }
}

/// Absolute directory containing the settings file.
fn base_dir(settings_file: &Path) -> PathBuf {
    let dir = settings_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    std::path::absolute(&dir).unwrap_or(dir)
}

fn resolve(path: &mut PathBuf, base: &Path) {
    if path.is_relative() && !path.as_os_str().is_empty() {
        *path = base.join(&*path);
    }
}
