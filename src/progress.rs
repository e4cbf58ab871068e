//! Progress-callback trait for per-record backfill events.
//!
//! Inject an [`Arc<dyn BackfillProgress>`] via
//! [`crate::backfill::BackfillRunner::with_progress`] to receive events as
//! the runner converts each pending record. The CLI uses it to drive a
//! terminal progress bar; tests use it to observe ordering.
//!
//! # Example
//!
//! ```rust
//! use pdfvault::{ArchiveId, BackfillProgress};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! #[derive(Default)]
//! struct CountFailures(AtomicUsize);
//!
//! impl BackfillProgress for CountFailures {
//!     fn on_record_failed(&self, _id: ArchiveId, _file_name: &str, _error: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::backfill::BackfillReport;
use crate::model::ArchiveId;
use std::sync::Arc;

/// Called by the backfill runner as it processes each record.
///
/// With a concurrency above one, the per-record methods may be called from
/// several conversions at once, so implementations must synchronise any
/// shared state. All methods default to no-ops.
pub trait BackfillProgress: Send + Sync {
    /// Called once, after the pending batch has been fetched.
    ///
    /// # Arguments
    /// * `batch_size`    : records in this batch
    /// * `pending_before`: records eligible for conversion before the run
    fn on_backfill_start(&self, batch_size: usize, pending_before: u64) {
        let _ = (batch_size, pending_before);
    }

    /// Called just before the converter is invoked for a record.
    fn on_record_start(&self, id: ArchiveId, file_name: &str) {
        let _ = (id, file_name);
    }

    /// Called after the PDF has been stored.
    fn on_record_converted(&self, id: ArchiveId, file_name: &str, pdf_len: usize) {
        let _ = (id, file_name, pdf_len);
    }

    /// Called after a conversion failure has been recorded, or when the
    /// outcome could not be stored.
    fn on_record_failed(&self, id: ArchiveId, file_name: &str, error: &str) {
        let _ = (id, file_name, error);
    }

    /// Called when the converter is unavailable and the record stays pending.
    fn on_record_skipped(&self, id: ArchiveId, file_name: &str) {
        let _ = (id, file_name);
    }

    /// Called once after every record in the batch has been attempted.
    fn on_backfill_complete(&self, report: &BackfillReport) {
        let _ = report;
    }
}

/// A no-op implementation; the runner's default.
pub struct NoopProgress;

impl BackfillProgress for NoopProgress {}

/// Convenience alias matching the type stored in the runner.
pub type ProgressCallback = Arc<dyn BackfillProgress>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        starts: AtomicUsize,
        converted: AtomicUsize,
        failed: AtomicUsize,
        skipped: AtomicUsize,
        batch: AtomicUsize,
    }

    impl BackfillProgress for Tracking {
        fn on_backfill_start(&self, batch_size: usize, _pending_before: u64) {
            self.batch.store(batch_size, Ordering::SeqCst);
        }

        fn on_record_start(&self, _id: ArchiveId, _file_name: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_record_converted(&self, _id: ArchiveId, _file_name: &str, _pdf_len: usize) {
            self.converted.fetch_add(1, Ordering::SeqCst);
        }

        fn on_record_failed(&self, _id: ArchiveId, _file_name: &str, _error: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_record_skipped(&self, _id: ArchiveId, _file_name: &str) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_does_not_panic() {
        let cb = NoopProgress;
        cb.on_backfill_start(2, 2);
        cb.on_record_start(ArchiveId(1), "a.docx");
        cb.on_record_converted(ArchiveId(1), "a.docx", 10);
        cb.on_record_failed(ArchiveId(2), "b.docx", "boom");
        cb.on_record_skipped(ArchiveId(3), "c.docx");
        cb.on_backfill_complete(&BackfillReport::default());
    }

    #[test]
    fn tracking_receives_events() {
        let t = Tracking::default();
        t.on_backfill_start(3, 5);
        for id in 1..=3 {
            t.on_record_start(ArchiveId(id), "f");
        }
        t.on_record_converted(ArchiveId(1), "f", 1);
        t.on_record_failed(ArchiveId(2), "f", "x");
        t.on_record_skipped(ArchiveId(3), "f");

        assert_eq!(t.batch.load(Ordering::SeqCst), 3);
        assert_eq!(t.starts.load(Ordering::SeqCst), 3);
        assert_eq!(t.converted.load(Ordering::SeqCst), 1);
        assert_eq!(t.failed.load(Ordering::SeqCst), 1);
        assert_eq!(t.skipped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgress);
        cb.on_record_start(ArchiveId(1), "a.txt");
    }
}
