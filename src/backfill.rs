//! One pass of PDF conversion over the pending queue.
//!
//! [`BackfillRunner::run`] fetches a bounded batch from the store, converts
//! each record and records the outcome. Records are independent: a failed
//! conversion is written to its own row and the batch moves on. An
//! unavailable converter leaves the record pending. Only losing the database
//! aborts the pass.
//!
//! Store calls are synchronous SQLite work and run on the blocking pool, so a
//! slow write never stalls the other conversions in flight.

use crate::convert::PdfConverter;
use crate::error::{truncate_error, StoreError, VaultError};
use crate::model::{ArchiveId, PendingRecord};
use crate::progress::{NoopProgress, ProgressCallback};
use crate::store::ContentStore;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub const DEFAULT_BATCH_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordRef {
    pub id: ArchiveId,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRecord {
    pub id: ArchiveId,
    pub file_name: String,
    pub message: String,
}

/// Outcome of one [`BackfillRunner::run`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
    /// Records eligible for conversion before the pass started.
    pub pending_before: u64,
    /// Records fetched for this pass.
    pub batch_size: usize,
    pub converted: Vec<RecordRef>,
    /// Conversions recorded as failed.
    pub failed: Vec<FailedRecord>,
    /// Left pending because the converter is unavailable.
    pub skipped: Vec<RecordRef>,
    /// Outcomes that could not be written. The record keeps its old state.
    pub unrecorded: Vec<FailedRecord>,
    pub duration_ms: u64,
}

impl BackfillReport {
    /// Records that reached Succeeded in this pass.
    pub fn success_count(&self) -> usize {
        self.converted.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    fn push(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Converted(r) => self.converted.push(r),
            Outcome::Failed(r) => self.failed.push(r),
            Outcome::Skipped(r) => self.skipped.push(r),
            Outcome::Unrecorded(r) => self.unrecorded.push(r),
        }
    }

    /// Completion order depends on concurrency; present results by id.
    fn sort(&mut self) {
        self.converted.sort_by_key(|r| r.id);
        self.failed.sort_by_key(|r| r.id);
        self.skipped.sort_by_key(|r| r.id);
        self.unrecorded.sort_by_key(|r| r.id);
    }
}

enum Outcome {
    Converted(RecordRef),
    Failed(FailedRecord),
    Skipped(RecordRef),
    Unrecorded(FailedRecord),
}

/// Drives a [`PdfConverter`] over the store's pending records.
pub struct BackfillRunner<C> {
    store: ContentStore,
    converter: C,
    concurrency: usize,
    progress: ProgressCallback,
}

impl<C: PdfConverter> BackfillRunner<C> {
    /// The runner shares `store`'s connection.
    pub fn new(store: &ContentStore, converter: C) -> Self {
        Self {
            store: store.clone(),
            converter,
            concurrency: 1,
            progress: Arc::new(NoopProgress),
        }
    }

    /// Number of conversions in flight at once. Values below one mean one.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Convert up to `batch_limit` pending records.
    ///
    /// # Errors
    /// Only when the store cannot be read, or a write fails in a way that
    /// means the database is gone. In-flight conversions are cancelled and
    /// their processes killed.
    pub async fn run(&self, batch_limit: usize) -> Result<BackfillReport, VaultError> {
        let started = Instant::now();
        let (pending_before, batch) = self
            .on_store(move |store| Ok((store.pending_count()?, store.list_pending(batch_limit)?)))
            .await?;

        let mut report = BackfillReport {
            pending_before,
            batch_size: batch.len(),
            ..Default::default()
        };

        info!(
            "Backfill: {} pending, converting {} (concurrency {})",
            pending_before,
            batch.len(),
            self.concurrency
        );
        self.progress.on_backfill_start(batch.len(), pending_before);

        let mut outcomes = stream::iter(batch)
            .map(|record| self.process(record))
            .buffer_unordered(self.concurrency);

        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Ok(o) => report.push(o),
                Err(e) => {
                    error!("Store unavailable, aborting backfill: {}", e);
                    return Err(e.into());
                }
            }
        }

        report.sort();
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Backfill complete: {} converted, {} failed, {} skipped, {} unrecorded in {}ms",
            report.converted.len(),
            report.failed.len(),
            report.skipped.len(),
            report.unrecorded.len(),
            report.duration_ms
        );
        self.progress.on_backfill_complete(&report);
        Ok(report)
    }

    /// Convert one record and store the outcome. `Err` only for connection
    /// loss; every other failure becomes an [`Outcome`].
    async fn process(&self, record: PendingRecord) -> Result<Outcome, StoreError> {
        let PendingRecord {
            id,
            file_name,
            extension,
            raw_bytes,
        } = record;
        self.progress.on_record_start(id, &file_name);

        let converted = self
            .converter
            .convert_to_pdf(&file_name, extension.as_deref(), &raw_bytes)
            .await;

        match converted {
            Ok(pdf) => match self
                .on_store(move |store| {
                    store.mark_succeeded(id, &pdf)?;
                    Ok(pdf.len())
                })
                .await
            {
                Ok(pdf_len) => {
                    info!(%id, file = %file_name, pdf_bytes = pdf_len, "PDF stored");
                    self.progress.on_record_converted(id, &file_name, pdf_len);
                    Ok(Outcome::Converted(RecordRef { id, file_name }))
                }
                Err(e) => self.unrecorded(id, file_name, e),
            },
            Err(e) if e.is_unavailable() => {
                warn!(%id, file = %file_name, "Skipped, converter unavailable: {}", e);
                self.progress.on_record_skipped(id, &file_name);
                Ok(Outcome::Skipped(RecordRef { id, file_name }))
            }
            Err(e) => {
                let message = truncate_error(&e.to_string());
                let stored = message.clone();
                match self
                    .on_store(move |store| store.mark_failed(id, &stored))
                    .await
                {
                    Ok(()) => {
                        warn!(%id, file = %file_name, "Conversion failed: {}", message);
                        self.progress.on_record_failed(id, &file_name, &message);
                        Ok(Outcome::Failed(FailedRecord {
                            id,
                            file_name,
                            message,
                        }))
                    }
                    Err(store_err) => self.unrecorded(id, file_name, store_err),
                }
            }
        }
    }

    /// Run `f` against the store on the blocking pool.
    async fn on_store<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&ContentStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Task(format!("Store task panicked: {}", e)))?
    }

    fn unrecorded(
        &self,
        id: ArchiveId,
        file_name: String,
        err: StoreError,
    ) -> Result<Outcome, StoreError> {
        if err.is_connection_loss() {
            return Err(err);
        }
        warn!(%id, file = %file_name, "Could not record outcome: {}", err);
        let message = err.to_string();
        self.progress.on_record_failed(id, &file_name, &message);
        Ok(Outcome::Unrecorded(FailedRecord {
            id,
            file_name,
            message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertError;
    use crate::model::{ConversionState, FileMetadata};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails files whose name starts with `bad`, returns a fake PDF otherwise.
    struct ByName;

    impl PdfConverter for ByName {
        async fn convert_to_pdf(
            &self,
            file_name: &str,
            _extension: Option<&str>,
            raw_bytes: &[u8],
        ) -> Result<Vec<u8>, ConvertError> {
            if file_name.starts_with("bad") {
                return Err(ConvertError::ProcessFailed {
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: format!("cannot convert {file_name}"),
                });
            }
            let mut pdf = b"%PDF-".to_vec();
            pdf.extend_from_slice(raw_bytes);
            Ok(pdf)
        }
    }

    struct Missing;

    impl PdfConverter for Missing {
        async fn convert_to_pdf(
            &self,
            _file_name: &str,
            _extension: Option<&str>,
            _raw_bytes: &[u8],
        ) -> Result<Vec<u8>, ConvertError> {
            Err(ConvertError::ExecutableNotFound {
                path: "/opt/none/soffice".into(),
            })
        }
    }

    /// Stores a PDF for record 1 itself before answering, so the runner's own
    /// write for that record finds it already converted.
    struct ConvertedElsewhere(ContentStore);

    impl PdfConverter for ConvertedElsewhere {
        async fn convert_to_pdf(
            &self,
            _file_name: &str,
            _extension: Option<&str>,
            _raw_bytes: &[u8],
        ) -> Result<Vec<u8>, ConvertError> {
            let _ = self.0.mark_succeeded(ArchiveId(1), b"%PDF-elsewhere");
            Ok(b"%PDF-runner".to_vec())
        }
    }

    /// Breaks the store's connection lock mid-batch.
    struct PoisonsStore(ContentStore);

    impl PdfConverter for PoisonsStore {
        async fn convert_to_pdf(
            &self,
            _file_name: &str,
            _extension: Option<&str>,
            _raw_bytes: &[u8],
        ) -> Result<Vec<u8>, ConvertError> {
            self.0.poison_for_test();
            Ok(b"%PDF-".to_vec())
        }
    }

    fn seeded(names: &[&str]) -> ContentStore {
        let store = ContentStore::open_in_memory().unwrap();
        for name in names {
            let bytes = format!("content of {name}");
            store
                .insert(bytes.as_bytes(), &FileMetadata::named(*name, bytes.len() as u64))
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_batch() {
        let store = seeded(&["a.docx", "bad.docx", "c.docx"]);
        let report = BackfillRunner::new(&store, ByName).run(10).await.unwrap();

        assert_eq!(report.pending_before, 3);
        assert_eq!(report.success_count(), 2);
        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.failed[0].file_name, "bad.docx");
        assert!(report.failed[0].message.contains("cannot convert bad.docx"));

        let ok = store.get(ArchiveId(1)).unwrap().unwrap();
        assert_eq!(ok.state, ConversionState::Succeeded);
        assert!(ok.pdf_bytes.unwrap().starts_with(b"%PDF-"));
        let bad = store.get(ArchiveId(2)).unwrap().unwrap();
        assert_eq!(bad.state, ConversionState::Failed);
    }

    #[tokio::test]
    async fn unavailable_converter_leaves_records_pending() {
        let store = seeded(&["a.docx", "b.docx"]);
        let report = BackfillRunner::new(&store, Missing).run(10).await.unwrap();

        assert_eq!(report.success_count(), 0);
        assert_eq!(report.failure_count(), 0);
        assert_eq!(report.skipped.len(), 2);
        for id in [1, 2] {
            let rec = store.get(ArchiveId(id)).unwrap().unwrap();
            assert_eq!(rec.state, ConversionState::Pending);
            assert_eq!(rec.attempts, 0);
            assert!(rec.error.is_none());
        }
    }

    #[tokio::test]
    async fn batch_limit_bounds_work() {
        let store = seeded(&["1.txt", "2.txt", "3.txt", "4.txt"]);
        let runner = BackfillRunner::new(&store, ByName);

        let first = runner.run(3).await.unwrap();
        assert_eq!(first.batch_size, 3);
        assert_eq!(first.success_count(), 3);

        let second = runner.run(3).await.unwrap();
        assert_eq!(second.pending_before, 1);
        assert_eq!(second.converted[0].id, ArchiveId(4));

        let third = runner.run(3).await.unwrap();
        assert_eq!(third.batch_size, 0);
    }

    #[tokio::test]
    async fn concurrent_run_reports_in_id_order() {
        let names: Vec<String> = (0..12).map(|i| format!("doc{i:02}.odt")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let store = seeded(&refs);

        let report = BackfillRunner::new(&store, ByName)
            .with_concurrency(4)
            .run(50)
            .await
            .unwrap();

        assert_eq!(report.success_count(), 12);
        let ids: Vec<i64> = report.converted.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, (1..=12).collect::<Vec<_>>());
        assert_eq!(store.status_counts().unwrap().succeeded, 12);
    }

    #[tokio::test]
    async fn progress_sees_every_record() {
        #[derive(Default)]
        struct Count {
            started: AtomicUsize,
            done: AtomicUsize,
        }
        impl crate::progress::BackfillProgress for Count {
            fn on_record_start(&self, _id: ArchiveId, _file_name: &str) {
                self.started.fetch_add(1, Ordering::SeqCst);
            }
            fn on_record_converted(&self, _id: ArchiveId, _file_name: &str, _pdf_len: usize) {
                self.done.fetch_add(1, Ordering::SeqCst);
            }
            fn on_record_failed(&self, _id: ArchiveId, _file_name: &str, _error: &str) {
                self.done.fetch_add(1, Ordering::SeqCst);
            }
        }

        let store = seeded(&["a.txt", "bad.txt"]);
        let count = Arc::new(Count::default());
        BackfillRunner::new(&store, ByName)
            .with_progress(count.clone())
            .run(10)
            .await
            .unwrap();

        assert_eq!(count.started.load(Ordering::SeqCst), 2);
        assert_eq!(count.done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn row_error_is_unrecorded_and_batch_continues() {
        let store = seeded(&["a.txt", "b.txt"]);
        let report = BackfillRunner::new(&store, ConvertedElsewhere(store.clone()))
            .run(10)
            .await
            .unwrap();

        assert_eq!(report.unrecorded.len(), 1);
        assert_eq!(report.unrecorded[0].id, ArchiveId(1));
        assert!(
            report.unrecorded[0].message.contains("already has a PDF"),
            "got: {}",
            report.unrecorded[0].message
        );
        assert_eq!(report.success_count(), 1);
        assert_eq!(report.converted[0].id, ArchiveId(2));

        let first = store.get(ArchiveId(1)).unwrap().unwrap();
        assert_eq!(first.pdf_bytes.as_deref(), Some(&b"%PDF-elsewhere"[..]));
        assert_eq!(first.attempts, 1);
    }

    #[tokio::test]
    async fn lost_store_aborts_the_pass() {
        let store = seeded(&["a.txt", "b.txt"]);
        let err = BackfillRunner::new(&store, PoisonsStore(store.clone()))
            .run(10)
            .await
            .unwrap_err();

        assert!(matches!(err, VaultError::Store(StoreError::Poisoned)), "got: {err:?}");
    }
}
