//! Document-to-PDF conversion through headless LibreOffice.
//!
//! [`PdfConverter`] is the seam the backfill runner depends on;
//! [`SofficeConverter`] implements it by running `soffice --convert-to pdf`
//! on one file at a time.
//!
//! ## Invocation lifecycle
//!
//! 1. A fresh working directory is created under the configured temp root
//!    with a random suffix, so concurrent conversions never share files.
//! 2. The input bytes are written as `input<ext>`.
//! 3. `soffice` runs in its own process group with a per-invocation user
//!    profile, stdin closed and both output streams captured.
//! 4. The wait is bounded by the configured timeout. On expiry the whole
//!    process group is killed and the child reaped before returning.
//! 5. Once `soffice` exits, anything left in its process group is killed, so
//!    no helper outlives the conversion or writes into a removed directory.
//! 6. The working directory is removed whatever the outcome. A cleanup
//!    failure is logged and never replaces the conversion result.

use crate::error::{ConvertError, VaultError};
use soffice_locate::SystemProbe;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// How long to wait for both captured streams once the process has exited.
/// A helper outside the process group may hold the pipes open.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Converts one file's bytes into PDF bytes.
pub trait PdfConverter: Send + Sync {
    fn convert_to_pdf(
        &self,
        file_name: &str,
        extension: Option<&str>,
        raw_bytes: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, ConvertError>> + Send;
}

/// The extension presented to the converter: `extension` if non-empty, else
/// the one in `file_name`, else `.bin`. Always lower case with a leading dot.
pub fn normalize_extension(file_name: &str, extension: Option<&str>) -> String {
    let picked = extension
        .map(str::trim)
        .filter(|e| !e.trim_start_matches('.').is_empty())
        .map(str::to_string)
        .or_else(|| {
            Path::new(file_name)
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .filter(|e| !e.is_empty())
        });

    match picked {
        Some(ext) => format!(".{}", ext.trim_start_matches('.').to_ascii_lowercase()),
        None => ".bin".to_string(),
    }
}

// ── Configuration ────────────────────────────────────────────────────────

/// Settings for [`SofficeConverter`], built via [`ConverterConfig::builder`].
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// The `soffice` executable. A bare name is resolved through `PATH`.
    pub soffice_path: PathBuf,

    /// Parent of the per-conversion working directories. Created on demand.
    pub temp_root: PathBuf,

    /// Wall-clock limit for one conversion. Default: 60.
    pub timeout_secs: u64,

    /// Give every invocation its own LibreOffice user profile inside the
    /// working directory. Default: true.
    ///
    /// A shared profile is locked by the first running instance, which makes
    /// concurrent conversions fail or hang.
    pub isolated_profile: bool,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            soffice_path: PathBuf::from(soffice_locate::executable_name()),
            temp_root: std::env::temp_dir().join("pdfvault"),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            isolated_profile: true,
        }
    }
}

impl ConverterConfig {
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Builder for [`ConverterConfig`].
#[derive(Debug)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn soffice_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.soffice_path = path.into();
        self
    }

    pub fn temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_root = dir.into();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn isolated_profile(mut self, v: bool) -> Self {
        self.config.isolated_profile = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConverterConfig, VaultError> {
        let c = &self.config;
        if c.timeout_secs == 0 {
            return Err(VaultError::InvalidConfig(
                "Conversion timeout must be ≥ 1 second".into(),
            ));
        }
        if c.soffice_path.as_os_str().is_empty() {
            return Err(VaultError::InvalidConfig(
                "soffice path must not be empty".into(),
            ));
        }
        if c.temp_root.as_os_str().is_empty() {
            return Err(VaultError::InvalidConfig(
                "Temp root must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── LibreOffice converter ────────────────────────────────────────────────

/// [`PdfConverter`] backed by the LibreOffice command line.
#[derive(Debug, Clone)]
pub struct SofficeConverter {
    config: ConverterConfig,
}

impl SofficeConverter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    fn not_found(&self) -> ConvertError {
        ConvertError::ExecutableNotFound {
            path: self.config.soffice_path.clone(),
        }
    }

    /// A path with directory components must exist; a bare name is left to
    /// the `PATH` lookup at spawn time.
    fn executable_missing(&self) -> bool {
        let path = &self.config.soffice_path;
        has_dir_component(path) && !path.is_file()
    }

    /// Whether the configured executable names a file, directly or through
    /// `PATH`.
    fn executable_resolves(&self) -> bool {
        let path = &self.config.soffice_path;
        if has_dir_component(path) {
            path.is_file()
        } else {
            soffice_locate::which(path, &SystemProbe).is_some()
        }
    }

    async fn run_in(&self, work: &Path, ext: &str, raw_bytes: &[u8]) -> Result<Vec<u8>, ConvertError> {
        let input = work.join(format!("input{ext}"));
        tokio::fs::write(&input, raw_bytes)
            .await
            .map_err(ConvertError::WorkArea)?;

        let mut cmd = self.command(work, &input);
        // ENOENT also covers a script whose interpreter is missing; only an
        // executable that does not resolve counts as not installed.
        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound && !self.executable_resolves() {
                self.not_found()
            } else {
                ConvertError::Spawn {
                    path: self.config.soffice_path.clone(),
                    source,
                }
            }
        })?;

        let pid = child.id();
        debug!(pid, "Started {}", self.config.soffice_path.display());
        let stdout = capture(child.stdout.take());
        let stderr = capture(child.stderr.take());

        let status = match tokio::time::timeout(self.config.timeout(), child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => {
                kill_tree(pid, &mut child).await;
                return Err(ConvertError::Spawn {
                    path: self.config.soffice_path.clone(),
                    source,
                });
            }
            Err(_) => {
                warn!(pid, secs = self.config.timeout_secs, "Conversion timed out, killing process tree");
                kill_tree(pid, &mut child).await;
                stdout.abort();
                stderr.abort();
                return Err(ConvertError::Timeout {
                    secs: self.config.timeout_secs,
                });
            }
        };

        kill_group(pid).await;
        let (stdout, stderr) = drain(stdout, stderr).await;
        collect_output(work, status, stdout, stderr).await
    }

    fn command(&self, work: &Path, input: &Path) -> Command {
        let mut std_cmd = std::process::Command::new(&self.config.soffice_path);
        if self.config.isolated_profile {
            std_cmd.arg(format!(
                "-env:UserInstallation={}",
                file_url(&work.join("profile"))
            ));
        }
        std_cmd
            .args([
                "--headless",
                "--nologo",
                "--nofirststartwizard",
                "--norestore",
                "--convert-to",
                "pdf",
                "--outdir",
            ])
            .arg(work)
            .arg(input)
            .current_dir(work)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so a timeout can take down soffice's helpers too.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);
        cmd
    }
}

impl PdfConverter for SofficeConverter {
    async fn convert_to_pdf(
        &self,
        file_name: &str,
        extension: Option<&str>,
        raw_bytes: &[u8],
    ) -> Result<Vec<u8>, ConvertError> {
        if self.executable_missing() {
            return Err(self.not_found());
        }

        let ext = normalize_extension(file_name, extension);

        tokio::fs::create_dir_all(&self.config.temp_root)
            .await
            .map_err(ConvertError::WorkArea)?;
        let work = tempfile::Builder::new()
            .prefix("pdfvault-")
            .tempdir_in(&self.config.temp_root)
            .map_err(ConvertError::WorkArea)?;
        debug!(file = file_name, "Converting in {}", work.path().display());

        let result = self.run_in(work.path(), &ext, raw_bytes).await;

        let work_path = work.path().to_path_buf();
        if let Err(e) = work.close() {
            warn!("Failed to remove working directory {}: {}", work_path.display(), e);
        }

        if let Ok(pdf) = &result {
            info!(file = file_name, pdf_bytes = pdf.len(), "Converted to PDF");
        }
        result
    }
}

fn capture<R>(stream: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut s) = stream {
            let _ = s.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Collect both streams under one shared deadline.
async fn drain(mut stdout: JoinHandle<String>, mut stderr: JoinHandle<String>) -> (String, String) {
    let both = async { tokio::join!(&mut stdout, &mut stderr) };
    let joined = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, both).await;
    match joined {
        Ok((out, err)) => (out.unwrap_or_default(), err.unwrap_or_default()),
        Err(_) => {
            warn!("Converter output still open after exit, discarding it");
            stdout.abort();
            stderr.abort();
            (String::new(), String::new())
        }
    }
}

async fn collect_output(
    work: &Path,
    status: ExitStatus,
    stdout: String,
    stderr: String,
) -> Result<Vec<u8>, ConvertError> {
    if !status.success() {
        return Err(ConvertError::ProcessFailed {
            exit_code: status.code(),
            stdout,
            stderr,
        });
    }

    let expected = work.join("input.pdf");
    let output = if expected.is_file() {
        Some(expected)
    } else {
        newest_pdf(work)
    };

    match output {
        Some(path) => tokio::fs::read(&path).await.map_err(ConvertError::WorkArea),
        None => Err(ConvertError::NoOutputProduced { stdout, stderr }),
    }
}

/// Most recently modified `*.pdf` directly inside `dir`.
fn newest_pdf(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
        })
        .max_by_key(|p| {
            std::fs::metadata(p)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH)
        })
}

/// Kill the child and everything it started, then reap it.
async fn kill_tree(pid: Option<u32>, child: &mut Child) {
    kill_group(pid).await;

    let _ = child.start_kill();
    if let Err(e) = child.wait().await {
        warn!("Failed to reap converter process: {}", e);
    }
}

/// Best-effort kill of every process in the child's group. Safe after the
/// child has been reaped: a group id is not reused while members remain.
async fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        #[cfg(unix)]
        {
            // The child leads its own group, so its pgid equals its pid.
            let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                // ESRCH: the group is already empty.
                debug!(pid, "killpg: {}", std::io::Error::last_os_error());
            }
        }
        #[cfg(windows)]
        {
            let result = Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/T", "/F"])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if let Err(e) = result {
                debug!(pid, "taskkill failed: {}", e);
            }
        }
    }
}

fn has_dir_component(path: &Path) -> bool {
    path.parent().is_some_and(|p| !p.as_os_str().is_empty())
}

/// `file://` URL for a local directory, as LibreOffice expects for
/// `-env:UserInstallation`.
fn file_url(path: &Path) -> String {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let text = abs.to_string_lossy().replace('\\', "/");
    if text.starts_with('/') {
        format!("file://{text}")
    } else {
        format!("file:///{text}")
    }
}
