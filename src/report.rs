//! End-of-run summary and its plain-text rendering.

use crate::backfill::BackfillReport;
use crate::ingest::IngestReport;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt::Write;

/// Aggregate of one ingest + backfill run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files_found: usize,
    /// Files stored this run, new or duplicate.
    pub ingested: usize,
    pub new_records: usize,
    pub duplicates: usize,
    pub pending_before: u64,
    pub converted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub converted_files: Vec<String>,
    pub failed_files: Vec<String>,
    /// Left pending because no converter was available.
    pub skipped_files: Vec<String>,
}

impl RunSummary {
    pub fn new(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        ingest: &IngestReport,
        backfill: &BackfillReport,
    ) -> Self {
        Self {
            started_at,
            finished_at,
            files_found: ingest.files_found,
            ingested: ingest.success_count(),
            new_records: ingest.inserted,
            duplicates: ingest.duplicates,
            pending_before: backfill.pending_before,
            converted: backfill.success_count(),
            failed: backfill.failure_count() + backfill.unrecorded.len(),
            skipped: backfill.skipped.len(),
            converted_files: backfill
                .converted
                .iter()
                .map(|r| r.file_name.clone())
                .collect(),
            failed_files: backfill
                .failed
                .iter()
                .chain(&backfill.unrecorded)
                .map(|r| r.file_name.clone())
                .collect(),
            skipped_files: backfill
                .skipped
                .iter()
                .map(|r| r.file_name.clone())
                .collect(),
        }
    }

    pub fn subject(&self) -> String {
        format!(
            "pdfvault run: {} converted, {} failed",
            self.converted, self.failed
        )
    }

    /// The plain-text report body.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let ts = |t: &DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Millis, true);

        let _ = writeln!(out, "pdfvault - PDF Conversion Report");
        let _ = writeln!(out, "Started (UTC):  {}", ts(&self.started_at));
        let _ = writeln!(out, "Finished (UTC): {}", ts(&self.finished_at));
        out.push('\n');
        let _ = writeln!(out, "Files found:        {}", self.files_found);
        let _ = writeln!(
            out,
            "Ingested this run:  {} ({} new, {} duplicate)",
            self.ingested, self.new_records, self.duplicates
        );
        let _ = writeln!(out, "Pending before run: {}", self.pending_before);
        let _ = writeln!(out, "PDF converted OK:   {}", self.converted);
        let _ = writeln!(out, "PDF failed:         {}", self.failed);
        let _ = writeln!(out, "PDF skipped:        {}", self.skipped);
        out.push('\n');
        list_section(&mut out, "Converted files", &self.converted_files);
        list_section(&mut out, "Failed files", &self.failed_files);
        list_section(&mut out, "Skipped files", &self.skipped_files);
        out
    }
}

fn list_section(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        let _ = writeln!(out, "{title}: (none)");
        return;
    }
    let _ = writeln!(out, "{title}:");
    for item in items {
        let _ = writeln!(out, "  - {item}");
    }
    out.push('\n');
}
