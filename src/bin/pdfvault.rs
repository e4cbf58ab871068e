//! CLI binary for pdfvault.
//!
//! One run = ingest the watch directory, then convert one batch of pending
//! records to PDF, then report. Settings come from a JSON file; flags
//! override individual values.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdfvault::{
    ingest_directory, AppSettings, ArchiveId, BackfillProgress, BackfillReport, BackfillRunner,
    ContentStore, IngestReport, ProgressCallback, RunSummary, SofficeConverter,
};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per record. Records may finish out of
/// order when conversions run concurrently.
struct CliProgress {
    bar: ProgressBar,
    start_times: Mutex<HashMap<ArchiveId, Instant>>,
    errors: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading queue…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }

    fn elapsed(&self, id: ArchiveId) -> String {
        let ms = self
            .start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&id))
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }
}

impl BackfillProgress for CliProgress {
    fn on_backfill_start(&self, batch_size: usize, pending_before: u64) {
        self.activate_bar(batch_size);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Converting {batch_size} of {pending_before} pending file(s)…"
            ))
        ));
    }

    fn on_record_start(&self, id: ArchiveId, file_name: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(id, Instant::now());
        }
        self.bar.set_message(file_name.to_string());
    }

    fn on_record_converted(&self, id: ArchiveId, file_name: &str, pdf_len: usize) {
        self.bar.println(format!(
            "  {} #{:<5} {:<40}  {:<12}  {}",
            green("✓"),
            id,
            file_name,
            dim(&format!("{pdf_len:>8} bytes")),
            self.elapsed(id),
        ));
        self.bar.inc(1);
    }

    fn on_record_failed(&self, id: ArchiveId, file_name: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        // First line only, cut to keep the log tidy.
        let first = error.lines().next().unwrap_or_default();
        let msg: String = if first.chars().count() > 80 {
            first.chars().take(79).chain(['…']).collect()
        } else {
            first.to_string()
        };

        self.bar.println(format!(
            "  {} #{:<5} {:<40}  {}  {}",
            red("✗"),
            id,
            file_name,
            red(&msg),
            self.elapsed(id),
        ));
        self.bar.inc(1);
    }

    fn on_record_skipped(&self, id: ArchiveId, file_name: &str) {
        self.bar.println(format!(
            "  {} #{:<5} {:<40}  {}",
            yellow("–"),
            id,
            file_name,
            dim("converter unavailable, left pending"),
        ));
        self.elapsed(id);
        self.bar.inc(1);
    }

    fn on_backfill_complete(&self, report: &BackfillReport) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        let converted = report.success_count();

        if failed == 0 && report.skipped.is_empty() {
            eprintln!(
                "{} {} file(s) converted successfully",
                green("✔"),
                bold(&converted.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} converted  ({} failed, {} skipped)",
                if converted == 0 { red("✘") } else { cyan("⚠") },
                bold(&converted.to_string()),
                report.batch_size,
                red(&failed.to_string()),
                report.skipped.len(),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run with ./appsettings.json (defaults if the file is absent)
  pdfvault

  # Explicit settings file, larger batch, 4 conversions at once
  pdfvault --config /etc/pdfvault/appsettings.json --batch-limit 200 -c 4

  # Only convert what is already archived
  pdfvault --skip-ingest

  # Scheduled job on a host that must have LibreOffice
  pdfvault --require-soffice

  # Machine-readable summary
  pdfvault --json > run.json

SETTINGS FILE (appsettings.json):
  {
    "database": { "path": "Data/pdfvault.db" },
    "ingest":   { "watch_path": "InboundFiles", "delete_after_insert": false },
    "pdf":      { "soffice_path": null, "temp_path": "Temp/pdfvault",
                  "timeout_seconds": 60, "batch_limit": 50,
                  "concurrency": 1, "max_attempts": 3 },
    "email":    { "enabled": false, "smtp_host": "relay.local", "smtp_port": 25,
                  "secure_socket": "None", "require_auth": false,
                  "from_address": "vault@example.com", "to": ["ops@example.com"] }
  }
  Relative paths are resolved against the settings file's directory.

ENVIRONMENT VARIABLES:
  SOFFICE_PATH            LibreOffice executable, used when pdf.soffice_path is unset
  PDFVAULT_*              Per-flag overrides (see --help for each flag)
  RUST_LOG                tracing filter, e.g. RUST_LOG=pdfvault=debug
"#;

/// Archive files into SQLite and backfill PDF renditions with LibreOffice.
#[derive(Parser, Debug)]
#[command(
    name = "pdfvault",
    version,
    about = "Archive files into SQLite and backfill PDF renditions with LibreOffice",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Settings file. Defaults to ./appsettings.json, which may be absent.
    #[arg(long, env = "PDFVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file.
    #[arg(long, env = "PDFVAULT_DB")]
    db: Option<PathBuf>,

    /// Directory to ingest from.
    #[arg(long, env = "PDFVAULT_WATCH")]
    watch: Option<PathBuf>,

    /// Delete each source file after it is stored.
    #[arg(long, env = "PDFVAULT_DELETE_AFTER_INSERT")]
    delete_after_insert: bool,

    /// LibreOffice `soffice` executable.
    #[arg(long, env = "PDFVAULT_SOFFICE")]
    soffice: Option<PathBuf>,

    /// Parent directory for conversion working directories.
    #[arg(long, env = "PDFVAULT_TEMP")]
    temp_dir: Option<PathBuf>,

    /// Per-file conversion timeout in seconds.
    #[arg(long, env = "PDFVAULT_TIMEOUT")]
    timeout: Option<u64>,

    /// Maximum records converted this run.
    #[arg(long, env = "PDFVAULT_BATCH_LIMIT")]
    batch_limit: Option<usize>,

    /// Number of concurrent conversions.
    #[arg(short, long, env = "PDFVAULT_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Attempts before a failed record is no longer retried.
    #[arg(long, env = "PDFVAULT_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Skip the ingest step.
    #[arg(long)]
    skip_ingest: bool,

    /// Skip the conversion step.
    #[arg(long)]
    skip_backfill: bool,

    /// Fail the run when no LibreOffice executable can be found, instead of
    /// leaving records pending.
    #[arg(long, env = "PDFVAULT_REQUIRE_SOFFICE")]
    require_soffice: bool,

    /// Do not e-mail the report even if enabled in settings.
    #[arg(long, env = "PDFVAULT_NO_EMAIL")]
    no_email: bool,

    /// Print the run summary as JSON on stdout.
    #[arg(long, env = "PDFVAULT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDFVAULT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFVAULT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the summary.
    #[arg(short, long, env = "PDFVAULT_QUIET")]
    quiet: bool,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    summary: &'a RunSummary,
    ingest: &'a IngestReport,
    backfill: &'a BackfillReport,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let started_at = Utc::now();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during the run.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Settings ─────────────────────────────────────────────────────────
    let settings = load_settings(&cli)?;
    settings.validate().context("Invalid configuration")?;
    settings.prepare_dirs().context("Failed to create working directories")?;

    // ── Store ────────────────────────────────────────────────────────────
    let store = ContentStore::open(&settings.database.path)
        .with_context(|| format!("Failed to open database {}", settings.database.path.display()))?
        .with_retry_policy(settings.retry_policy());

    let sqlite_version = store.sqlite_version().context("Database check failed")?;
    status(&cli, format!("SQLite version: {}", bold(&sqlite_version)));
    status(&cli, format!("DB path:        {}", settings.database.path.display()));

    // ── Ingest ───────────────────────────────────────────────────────────
    let ingest = if cli.skip_ingest {
        IngestReport::default()
    } else {
        status(&cli, format!("Watch path:     {}", settings.ingest.watch_path.display()));
        let report = tokio::task::block_in_place(|| {
            ingest_directory(
                &store,
                &settings.ingest.watch_path,
                settings.ingest.delete_after_insert,
            )
        })
        .context("Ingest failed")?;

        status(
            &cli,
            format!(
                "{} Ingested {}/{} file(s)  {}",
                if report.failures.is_empty() { green("✔") } else { cyan("⚠") },
                report.success_count(),
                report.files_found,
                dim(&format!(
                    "{} new, {} duplicate, {} deleted",
                    report.inserted, report.duplicates, report.deleted
                )),
            ),
        );
        for f in &report.failures {
            status(&cli, format!("  {} {}  {}", red("✗"), f.path.display(), red(&f.message)));
        }
        report
    };

    let rows = store.count().context("Failed to count records")?;
    status(&cli, format!("Rows in archive: {}", bold(&rows.to_string())));

    // ── Backfill ─────────────────────────────────────────────────────────
    let backfill = if cli.skip_backfill {
        BackfillReport {
            pending_before: store.pending_count().context("Failed to read queue")?,
            ..Default::default()
        }
    } else {
        let configured = settings.pdf.soffice_path.as_deref();
        let soffice = if cli.require_soffice {
            soffice_locate::locate_strict(configured).context("LibreOffice is required")?
        } else {
            soffice_locate::locate(configured)
        };
        status(
            &cli,
            format!(
                "soffice:        {}  {}",
                soffice.path.display(),
                dim(&format!("(via {}, exists: {})", soffice.source, soffice.exists)),
            ),
        );
        if soffice.source == soffice_locate::Source::Explicit && !soffice.exists {
            status(
                &cli,
                yellow("WARNING: pdf.soffice_path is set but the file does not exist; records will stay pending."),
            );
        } else if soffice.is_bare_fallback() {
            status(
                &cli,
                yellow(&format!(
                    "NOTE: using bare '{}', which requires LibreOffice on PATH. \
                     Set pdf.soffice_path or SOFFICE_PATH if conversions are skipped.",
                    soffice.path.display()
                )),
            );
        }

        let converter = SofficeConverter::new(
            settings
                .converter_config(soffice.path)
                .context("Invalid converter configuration")?,
        );
        let cc = converter.config();
        status(
            &cli,
            format!(
                "Temp path:      {}  {}",
                cc.temp_root.display(),
                dim(&format!("(timeout {}s)", cc.timeout_secs)),
            ),
        );
        let mut runner = BackfillRunner::new(&store, converter)
            .with_concurrency(settings.pdf.concurrency);
        if show_progress {
            runner = runner.with_progress(CliProgress::new() as ProgressCallback);
        }

        runner
            .run(settings.pdf.batch_limit)
            .await
            .context("Backfill failed")?
    };

    // ── Report ───────────────────────────────────────────────────────────
    let summary = RunSummary::new(started_at, Utc::now(), &ingest, &backfill);

    if cli.json {
        let out = JsonOutput {
            summary: &summary,
            ingest: &ingest,
            backfill: &backfill,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&out).context("Failed to serialise summary")?
        );
    } else {
        print!("{}", summary.render_text());
    }

    send_report(&cli, &settings, &summary).await;
    Ok(())
}

/// Settings file plus flag overrides. Flag paths are taken as given.
fn load_settings(cli: &Cli) -> Result<AppSettings> {
    let mut settings = match &cli.config {
        Some(path) => AppSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => AppSettings::load_or_default(Path::new(pdfvault::config::DEFAULT_SETTINGS_FILE))
            .context("Failed to load appsettings.json")?,
    };

    if let Some(ref db) = cli.db {
        settings.database.path = db.clone();
    }
    if let Some(ref watch) = cli.watch {
        settings.ingest.watch_path = watch.clone();
    }
    if cli.delete_after_insert {
        settings.ingest.delete_after_insert = true;
    }
    if let Some(ref soffice) = cli.soffice {
        settings.pdf.soffice_path = Some(soffice.clone());
    }
    if let Some(ref temp) = cli.temp_dir {
        settings.pdf.temp_path = temp.clone();
    }
    if let Some(t) = cli.timeout {
        settings.pdf.timeout_seconds = t;
    }
    if let Some(n) = cli.batch_limit {
        settings.pdf.batch_limit = n;
    }
    if let Some(n) = cli.concurrency {
        settings.pdf.concurrency = n;
    }
    if let Some(n) = cli.max_attempts {
        settings.pdf.max_attempts = n;
    }
    if cli.no_email {
        settings.email.enabled = false;
    }
    Ok(settings)
}

/// Progress lines go to stderr so stdout stays the report.
fn status(cli: &Cli, line: String) {
    if !cli.quiet {
        eprintln!("{line}");
    }
}

#[cfg(feature = "email")]
async fn send_report(cli: &Cli, settings: &AppSettings, summary: &RunSummary) {
    if !settings.email.enabled {
        return;
    }
    let sent = match pdfvault::Mailer::from_settings(&settings.email) {
        Ok(mailer) => mailer.send_summary(summary).await,
        Err(e) => Err(e),
    };
    match sent {
        Ok(()) => status(cli, format!("{} Report e-mailed", green("✔"))),
        // Delivery is best effort; the run itself succeeded.
        Err(e) => {
            tracing::warn!("Failed to send report: {}", e);
            eprintln!("{} {}", red("✗"), red(&format!("Report e-mail failed: {e}")));
        }
    }
}

#[cfg(not(feature = "email"))]
async fn send_report(cli: &Cli, settings: &AppSettings, _summary: &RunSummary) {
    if settings.email.enabled {
        status(
            cli,
            yellow("NOTE: email is enabled in settings but this build has no `email` feature."),
        );
    }
}
