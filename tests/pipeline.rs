//! Integration tests for the ingest → backfill pipeline.
//!
//! Most tests drive the real [`SofficeConverter`] against small shell scripts
//! that behave like `soffice` (succeed, fail, hang). Those are Unix-only.
//!
//! A live LibreOffice test is gated behind `SOFFICE_E2E`:
//!   SOFFICE_E2E=1 cargo test --test pipeline live_ -- --nocapture

use pdfvault::{
    ingest_directory, ArchiveId, BackfillRunner, ContentStore, ConversionState, ConvertError,
    ConverterConfig, PdfConverter, RunSummary, SofficeConverter,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Store in a temp dir, seeded with one file per `(name, bytes)`.
fn seeded_store(tmp: &TempDir, files: &[(&str, &str)]) -> ContentStore {
    let inbox = tmp.path().join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();
    for (name, contents) in files {
        std::fs::write(inbox.join(name), contents).unwrap();
    }
    let store = ContentStore::open(tmp.path().join("archive.db")).unwrap();
    let report = ingest_directory(&store, &inbox, true).unwrap();
    assert_eq!(report.success_count(), files.len());
    store
}

fn converter(soffice: impl Into<PathBuf>, temp_root: &Path, timeout_secs: u64) -> SofficeConverter {
    SofficeConverter::new(
        ConverterConfig::builder()
            .soffice_path(soffice)
            .temp_root(temp_root)
            .timeout_secs(timeout_secs)
            .build()
            .unwrap(),
    )
}

fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(true)
}

/// Returns a PDF-looking echo of the input.
struct EchoPdf;

impl PdfConverter for EchoPdf {
    async fn convert_to_pdf(
        &self,
        _file_name: &str,
        _extension: Option<&str>,
        raw_bytes: &[u8],
    ) -> Result<Vec<u8>, ConvertError> {
        let mut out = b"%PDF-1.7\n".to_vec();
        out.extend_from_slice(raw_bytes);
        Ok(out)
    }
}

// ── In-process pipeline ──────────────────────────────────────────────────────

#[tokio::test]
async fn ingest_then_backfill_then_report() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let store = seeded_store(
        &tmp,
        &[("a.txt", "hello"), ("b.txt", "hello"), ("c.docx", "world")],
    );
    assert_eq!(store.count().unwrap(), 2);
    assert!(dir_is_empty(&tmp.path().join("inbox")));

    let started = chrono::Utc::now();
    let backfill = BackfillRunner::new(&store, EchoPdf).run(50).await.unwrap();
    assert_eq!(backfill.pending_before, 2);
    assert_eq!(backfill.success_count(), 2);

    let rec = store.get(ArchiveId(2)).unwrap().unwrap();
    assert_eq!(rec.state, ConversionState::Succeeded);
    assert_eq!(rec.pdf_bytes.as_deref(), Some(&b"%PDF-1.7\nworld"[..]));

    // Nothing left to do on the next run.
    let again = BackfillRunner::new(&store, EchoPdf).run(50).await.unwrap();
    assert_eq!(again.batch_size, 0);

    let ingest = pdfvault::IngestReport {
        files_found: 3,
        inserted: 2,
        duplicates: 1,
        ..Default::default()
    };
    let summary = RunSummary::new(started, chrono::Utc::now(), &ingest, &backfill);
    let text = summary.render_text();
    assert!(text.contains("Files found:        3\n"));
    assert!(text.contains("PDF converted OK:   2"));
    assert!(text.contains("  - a.txt"));
    assert!(text.contains("  - c.docx"));
}

#[tokio::test]
async fn missing_converter_leaves_everything_pending() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let store = seeded_store(&tmp, &[("a.docx", "one"), ("b.docx", "two")]);
    let conv = converter(
        tmp.path().join("not-installed").join("soffice"),
        &tmp.path().join("work"),
        5,
    );

    let report = BackfillRunner::new(&store, conv).run(10).await.unwrap();
    assert_eq!(report.success_count(), 0);
    assert_eq!(report.failure_count(), 0);
    assert_eq!(report.skipped.len(), 2);

    let counts = store.status_counts().unwrap();
    assert_eq!(counts.pending, 2);
    for id in [1, 2] {
        let rec = store.get(ArchiveId(id)).unwrap().unwrap();
        assert_eq!(rec.attempts, 0);
        assert!(rec.error.is_none());
    }
}

// ── Shell-script stand-ins for soffice ───────────────────────────────────────

#[cfg(unix)]
mod fake_soffice {
    use super::*;
    use pdfvault::error::MAX_ERROR_CHARS;
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};

    /// Parses the soffice command line into `$outdir` and `$input`, then runs
    /// `body`.
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let text = format!(
            r#"#!/bin/sh
outdir=""
input=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outdir) outdir="$2"; shift 2 ;;
    --convert-to) shift 2 ;;
    -*) shift ;;
    *) input="$1"; shift ;;
  esac
done
{body}
"#
        );
        std::fs::write(&path, text).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// `true` while `pid` is running (zombies count as gone).
    fn process_alive(pid: i32) -> bool {
        let stat = PathBuf::from(format!("/proc/{pid}/stat"));
        if Path::new("/proc/self/stat").exists() {
            return match std::fs::read_to_string(stat) {
                Ok(s) => s
                    .rsplit_once(')')
                    .and_then(|(_, rest)| rest.trim_start().chars().next())
                    .is_some_and(|state| state != 'Z'),
                Err(_) => false,
            };
        }
        unsafe { libc::kill(pid, 0) == 0 }
    }

    #[tokio::test]
    async fn successful_conversion_stores_pdf_and_cleans_up() {
        init_tracing();
        let tmp = tempfile::tempdir().unwrap();
        let bin = script(
            tmp.path(),
            "soffice-ok",
            r#"{ printf '%%PDF-1.4\n'; cat "$input"; } > "$outdir/input.pdf""#,
        );
        let store = seeded_store(&tmp, &[("memo.docx", "memo body"), ("sheet.xlsx", "cells")]);
        let work = tmp.path().join("work");

        let report = BackfillRunner::new(&store, converter(&bin, &work, 10))
            .run(10)
            .await
            .unwrap();

        assert_eq!(report.success_count(), 2, "failed: {:?}", report.failed);
        let rec = store.get(ArchiveId(1)).unwrap().unwrap();
        assert_eq!(rec.pdf_bytes.as_deref(), Some(&b"%PDF-1.4\nmemo body"[..]));
        assert!(rec.converted_at.is_some());
        assert!(dir_is_empty(&work), "working directories left behind");
    }

    #[tokio::test]
    async fn input_keeps_normalised_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = script(
            tmp.path(),
            "soffice-ext",
            r#"basename "$input" > "$outdir/input.pdf""#,
        );
        let conv = converter(&bin, &tmp.path().join("work"), 10);

        let pdf = conv.convert_to_pdf("Report.DOCX", None, b"x").await.unwrap();
        assert_eq!(pdf, b"input.docx\n");
        let pdf = conv.convert_to_pdf("README", Some(""), b"x").await.unwrap();
        assert_eq!(pdf, b"input.bin\n");
    }

    #[tokio::test]
    async fn falls_back_to_newest_pdf() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = script(
            tmp.path(),
            "soffice-renamed",
            r#"printf '%%PDF-renamed' > "$outdir/converted.pdf""#,
        );
        let conv = converter(&bin, &tmp.path().join("work"), 10);
        let pdf = conv.convert_to_pdf("a.odt", None, b"x").await.unwrap();
        assert_eq!(pdf, b"%PDF-renamed");
    }

    #[tokio::test]
    async fn process_failure_marks_every_record_failed() {
        init_tracing();
        let tmp = tempfile::tempdir().unwrap();
        // Far more stderr than an error column may hold.
        let bin = script(
            tmp.path(),
            "soffice-fail",
            r#"echo "Error: source file could not be loaded" >&2
head -c 5000 /dev/zero | tr '\0' 'x' >&2
exit 3"#,
        );
        let store = seeded_store(&tmp, &[("a.doc", "aaa"), ("b.doc", "bbb")]);

        let report = BackfillRunner::new(&store, converter(&bin, &tmp.path().join("work"), 10))
            .run(10)
            .await
            .unwrap();

        assert_eq!(report.success_count(), 0);
        assert_eq!(report.failure_count(), 2);
        for id in [1, 2] {
            let rec = store.get(ArchiveId(id)).unwrap().unwrap();
            assert_eq!(rec.state, ConversionState::Failed);
            assert!(rec.pdf_bytes.is_none());
            let err = rec.error.unwrap();
            assert!(!err.is_empty());
            assert!(err.chars().count() <= MAX_ERROR_CHARS);
            assert!(err.contains("exit 3"), "got: {}", &err[..80]);
            assert!(err.contains("could not be loaded"));
        }
    }

    #[tokio::test]
    async fn clean_exit_without_output_is_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = script(tmp.path(), "soffice-silent", r#"echo "convert done""#);
        let conv = converter(&bin, &tmp.path().join("work"), 10);

        match conv.convert_to_pdf("a.pptx", None, b"x").await {
            Err(ConvertError::NoOutputProduced { stdout, .. }) => {
                assert!(stdout.contains("convert done"));
            }
            other => panic!("expected NoOutputProduced, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hung_converter_and_its_children_are_killed() {
        init_tracing();
        let tmp = tempfile::tempdir().unwrap();
        let pid_file = tmp.path().join("child.pid");
        let bin = script(
            tmp.path(),
            "soffice-hang",
            &format!(
                r#"sleep 300 &
echo $! > "{}"
wait"#,
                pid_file.display()
            ),
        );
        let work = tmp.path().join("work");
        let conv = converter(&bin, &work, 1);

        let started = Instant::now();
        let result = conv.convert_to_pdf("slow.docx", None, b"x").await;
        let elapsed = started.elapsed();

        assert!(
            matches!(result, Err(ConvertError::Timeout { secs: 1 })),
            "got {result:?}"
        );
        assert!(elapsed < Duration::from_secs(15), "took {elapsed:?}");
        assert!(dir_is_empty(&work));

        let child: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while process_alive(child) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!process_alive(child), "grandchild {child} survived the timeout");
    }

    #[tokio::test]
    async fn helpers_do_not_outlive_a_completed_conversion() {
        init_tracing();
        let tmp = tempfile::tempdir().unwrap();
        let pid_file = tmp.path().join("helper.pid");
        // Leaves a background helper holding stdout and stderr, then succeeds.
        let bin = script(
            tmp.path(),
            "soffice-helper",
            &format!(
                r#"sleep 300 &
echo $! > "{}"
printf '%%PDF-helper' > "$outdir/input.pdf""#,
                pid_file.display()
            ),
        );
        let work = tmp.path().join("work");
        let conv = converter(&bin, &work, 30);

        let started = Instant::now();
        let pdf = conv.convert_to_pdf("memo.docx", None, b"x").await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(pdf, b"%PDF-helper");
        assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");
        assert!(dir_is_empty(&work));

        let helper: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while process_alive(helper) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!process_alive(helper), "helper {helper} survived a completed conversion");
    }

    #[tokio::test]
    async fn timeout_is_recorded_and_batch_continues() {
        let tmp = tempfile::tempdir().unwrap();
        // Hangs only for files whose content starts with "slow".
        let bin = script(
            tmp.path(),
            "soffice-mixed",
            r#"if grep -q '^slow' "$input"; then sleep 300; fi
printf '%%PDF' > "$outdir/input.pdf""#,
        );
        let store = seeded_store(
            &tmp,
            &[("1.txt", "fast one"), ("2.txt", "slow two"), ("3.txt", "fast three")],
        );

        let report = BackfillRunner::new(&store, converter(&bin, &tmp.path().join("work"), 1))
            .run(10)
            .await
            .unwrap();

        assert_eq!(report.success_count(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, ArchiveId(2));
        assert!(report.failed[0].message.contains("timed out"));
    }

    #[tokio::test]
    async fn concurrent_conversions_use_separate_directories() {
        let tmp = tempfile::tempdir().unwrap();
        // Fails if another conversion's input is visible in the same dir.
        let bin = script(
            tmp.path(),
            "soffice-isolated",
            r#"count=$(ls "$outdir" | grep -c '^input\.')
[ "$count" -eq 1 ] || exit 9
sleep 0.2
cat "$input" > "$outdir/input.pdf""#,
        );
        let files: Vec<(String, String)> = (0..6)
            .map(|i| (format!("f{i}.txt"), format!("body {i}")))
            .collect();
        let refs: Vec<(&str, &str)> = files
            .iter()
            .map(|(n, b)| (n.as_str(), b.as_str()))
            .collect();
        let store = seeded_store(&tmp, &refs);

        let report = BackfillRunner::new(&store, converter(&bin, &tmp.path().join("work"), 10))
            .with_concurrency(3)
            .run(10)
            .await
            .unwrap();

        assert_eq!(report.success_count(), 6, "failed: {:?}", report.failed);
        let rec = store.get(ArchiveId(4)).unwrap().unwrap();
        assert_eq!(rec.pdf_bytes.as_deref(), Some(&b"body 3"[..]));
    }
}

// ── Live LibreOffice ─────────────────────────────────────────────────────────

#[tokio::test]
async fn live_soffice_converts_text_file() {
    if std::env::var("SOFFICE_E2E").is_err() {
        println!("SKIP: set SOFFICE_E2E=1 to run against a real LibreOffice");
        return;
    }
    init_tracing();
    let found = soffice_locate::locate(None);
    if !found.exists {
        println!("SKIP: soffice not found");
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let conv = converter(found.path, &tmp.path().join("work"), 120);
    let pdf = conv
        .convert_to_pdf("hello.txt", None, b"Hello from pdfvault\n")
        .await
        .unwrap();
    assert!(pdf.starts_with(b"%PDF"), "output is not a PDF");
}
