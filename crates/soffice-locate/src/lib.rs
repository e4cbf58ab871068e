//! # soffice-locate
//!
//! Find the LibreOffice `soffice` executable without relying on ambient
//! global state. Discovery is an explicit, ordered list of [`Candidate`]s
//! evaluated by the pure function [`resolve`] against a [`Probe`] that answers
//! environment, filesystem and registry questions. Production code uses
//! [`SystemProbe`]; tests inject their own.
//!
//! ## Resolution order
//!
//! [`default_candidates`] builds the chain used by [`locate`]:
//!
//! 1. Explicit configuration value: always honoured, even when the file is
//!    missing, so a bad setting surfaces as a conversion-time
//!    "executable not found" instead of silently picking another install.
//! 2. `SOFFICE_PATH` environment variable: used only if the file exists.
//! 3. Well-known install locations for the current platform.
//! 4. The Windows install registry (`HKLM\SOFTWARE\LibreOffice\LibreOffice`).
//!
//! When nothing matches, the bare executable name is looked up on `PATH`; if
//! it is not found there either the bare name is still returned so the
//! operating system gets the final say when the process is spawned.
//!
//! ## Usage
//!
//! ```rust,no_run
//! let found = soffice_locate::locate(None);
//! println!("soffice = {} (via {}, exists: {})", found.path.display(), found.source, found.exists);
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Environment variable that overrides discovery.
pub const ENV_VAR: &str = "SOFFICE_PATH";

/// Registry key LibreOffice's Windows installer writes its install root to.
pub const REGISTRY_KEY: &str = r"HKLM\SOFTWARE\LibreOffice\LibreOffice";

/// File name of the executable on the current platform.
pub fn executable_name() -> &'static str {
    if cfg!(windows) {
        "soffice.exe"
    } else {
        "soffice"
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by [`locate_strict`].
#[derive(Error, Debug)]
pub enum LocateError {
    /// No candidate, and nothing on `PATH`, resolved to an existing file.
    #[error("LibreOffice executable not found (tried: {})", display_paths(tried))]
    NotFound { tried: Vec<PathBuf> },
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "PATH only".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Candidates and results ───────────────────────────────────────────────────

/// One step of the discovery chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// A path supplied by configuration. Accepted whenever non-empty.
    Explicit(PathBuf),
    /// Name of an environment variable holding a path.
    EnvVar(String),
    /// Fixed install locations, tried in order.
    Paths(Vec<PathBuf>),
    /// The platform install registry.
    Registry,
}

/// Where a [`Resolution`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Explicit,
    EnvVar(String),
    WellKnown,
    Registry,
    /// Found by scanning `PATH`, or left as a bare name for the OS to resolve.
    SearchPath,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Explicit => f.write_str("configuration"),
            Source::EnvVar(name) => write!(f, "${name}"),
            Source::WellKnown => f.write_str("install location"),
            Source::Registry => f.write_str("registry"),
            Source::SearchPath => f.write_str("PATH"),
        }
    }
}

/// The outcome of running the discovery chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path: PathBuf,
    pub source: Source,
    /// Whether `path` pointed at an existing file when resolved.
    pub exists: bool,
}

impl Resolution {
    /// `true` when discovery fell all the way through to a bare executable
    /// name that was not found on `PATH`.
    pub fn is_bare_fallback(&self) -> bool {
        self.source == Source::SearchPath && !self.exists
    }
}

// ── Probe ────────────────────────────────────────────────────────────────────

/// The side-effecting lookups [`resolve`] depends on.
pub trait Probe {
    fn var(&self, key: &str) -> Option<String>;
    fn is_file(&self, path: &Path) -> bool;
    /// Install root recorded by the platform registry, if any.
    fn registry_install_path(&self) -> Option<PathBuf>;
    /// Directories listed in `PATH`.
    fn search_dirs(&self) -> Vec<PathBuf>;
}

/// [`Probe`] backed by the real process environment and filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl Probe for SystemProbe {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn registry_install_path(&self) -> Option<PathBuf> {
        query_registry()
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default()
    }
}

#[cfg(windows)]
fn query_registry() -> Option<PathBuf> {
    let output = std::process::Command::new("reg")
        .args(["query", REGISTRY_KEY, "/v", "InstallPath"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_reg_query(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(not(windows))]
fn query_registry() -> Option<PathBuf> {
    None
}

/// Extract the `InstallPath` value from `reg query` output.
#[cfg_attr(not(windows), allow(dead_code))]
fn parse_reg_query(stdout: &str) -> Option<PathBuf> {
    stdout.lines().find_map(|line| {
        let line = line.trim();
        if !line.starts_with("InstallPath") {
            return None;
        }
        let (_, value) = line.split_once("REG_SZ")?;
        let value = value.trim();
        (!value.is_empty()).then(|| PathBuf::from(value))
    })
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Well-known install locations for the current platform.
pub fn well_known_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if cfg!(windows) {
        for var in ["ProgramFiles", "ProgramFiles(x86)", "ProgramW6432"] {
            if let Ok(root) = std::env::var(var) {
                paths.push(
                    PathBuf::from(root)
                        .join("LibreOffice")
                        .join("program")
                        .join("soffice.exe"),
                );
            }
        }
        paths.push(PathBuf::from(r"C:\Program Files\LibreOffice\program\soffice.exe"));
        paths.push(PathBuf::from(
            r"C:\Program Files (x86)\LibreOffice\program\soffice.exe",
        ));
    } else if cfg!(target_os = "macos") {
        paths.push(PathBuf::from(
            "/Applications/LibreOffice.app/Contents/MacOS/soffice",
        ));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join("Applications/LibreOffice.app/Contents/MacOS/soffice"));
        }
    } else {
        paths.extend(
            [
                "/usr/bin/soffice",
                "/usr/local/bin/soffice",
                "/usr/lib/libreoffice/program/soffice",
                "/opt/libreoffice/program/soffice",
                "/snap/bin/libreoffice",
            ]
            .into_iter()
            .map(PathBuf::from),
        );
        if let Some(bin) = dirs::executable_dir() {
            paths.push(bin.join("soffice"));
        }
    }

    paths.dedup();
    paths
}

/// The default chain: explicit value (if any), `SOFFICE_PATH`, install
/// locations, registry.
pub fn default_candidates(configured: Option<&Path>) -> Vec<Candidate> {
    let mut chain = Vec::with_capacity(4);
    if let Some(path) = configured {
        chain.push(Candidate::Explicit(path.to_path_buf()));
    }
    chain.push(Candidate::EnvVar(ENV_VAR.to_string()));
    chain.push(Candidate::Paths(well_known_paths()));
    chain.push(Candidate::Registry);
    chain
}

/// Evaluate `candidates` in order and return the first valid hit.
///
/// Never fails: when no candidate matches, `PATH` is scanned for
/// [`executable_name`], and failing that the bare name is returned with
/// `exists = false`.
pub fn resolve(candidates: &[Candidate], probe: &dyn Probe) -> Resolution {
    for candidate in candidates {
        if let Some(hit) = try_candidate(candidate, probe) {
            return hit;
        }
    }
    search_path(probe)
}

/// Run the default chain against the real system.
pub fn locate(configured: Option<&Path>) -> Resolution {
    resolve(&default_candidates(configured), &SystemProbe)
}

/// Like [`locate`], but fails unless the result points at an existing file.
pub fn locate_strict(configured: Option<&Path>) -> Result<Resolution, LocateError> {
    resolve_strict(&default_candidates(configured), &SystemProbe)
}

/// Like [`resolve`], but fails unless the result points at an existing file.
pub fn resolve_strict(
    candidates: &[Candidate],
    probe: &dyn Probe,
) -> Result<Resolution, LocateError> {
    let found = resolve(candidates, probe);
    if found.exists {
        return Ok(found);
    }
    let tried = candidates
        .iter()
        .flat_map(|c| match c {
            Candidate::Explicit(p) => vec![p.clone()],
            Candidate::Paths(ps) => ps.clone(),
            Candidate::EnvVar(_) | Candidate::Registry => Vec::new(),
        })
        .collect();
    Err(LocateError::NotFound { tried })
}

/// First file named `name` in the probe's search directories.
pub fn which(name: &Path, probe: &dyn Probe) -> Option<PathBuf> {
    probe
        .search_dirs()
        .into_iter()
        .map(|dir| dir.join(name))
        .find(|candidate| probe.is_file(candidate))
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn try_candidate(candidate: &Candidate, probe: &dyn Probe) -> Option<Resolution> {
    match candidate {
        Candidate::Explicit(path) => {
            if path.as_os_str().is_empty() {
                return None;
            }
            Some(Resolution {
                path: path.clone(),
                source: Source::Explicit,
                exists: probe.is_file(path),
            })
        }
        Candidate::EnvVar(name) => {
            let value = probe.var(name)?;
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            let path = PathBuf::from(value);
            probe.is_file(&path).then(|| Resolution {
                path,
                source: Source::EnvVar(name.clone()),
                exists: true,
            })
        }
        Candidate::Paths(paths) => paths.iter().find(|p| probe.is_file(p)).map(|p| Resolution {
            path: p.clone(),
            source: Source::WellKnown,
            exists: true,
        }),
        Candidate::Registry => {
            let root = probe.registry_install_path()?;
            let path = root.join("program").join("soffice.exe");
            probe.is_file(&path).then(|| Resolution {
                path,
                source: Source::Registry,
                exists: true,
            })
        }
    }
}

fn search_path(probe: &dyn Probe) -> Resolution {
    let name = executable_name();
    match which(Path::new(name), probe) {
        Some(path) => Resolution {
            path,
            source: Source::SearchPath,
            exists: true,
        },
        None => Resolution {
            path: PathBuf::from(name),
            source: Source::SearchPath,
            exists: false,
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
