//! Observable events emitted by a download run.
//!
//! Consumers (CLI, GUI, test harnesses) implement [`DownloadObserver`];
//! every method has a no-op default so implementations pick only what they
//! render. The orchestrator calls these from worker tasks, so implementors
//! must be cheap and non-blocking.

use std::path::Path;

use super::error::DownloadError;
use super::transport::ProbeReport;

/// Receiver for the events of one download run.
pub trait DownloadObserver: Send + Sync {
    /// The metadata probe is about to be issued.
    fn on_connecting(&self, _url: &str) {}

    /// The probe finished. The report is mutable: a consumer may accept an
    /// unusual status, correct the content length, or veto the run by
    /// returning an error (typically [`DownloadError::Rejected`]).
    ///
    /// # Errors
    ///
    /// Returning an error aborts the run before any bytes are transferred;
    /// the error becomes the run's result.
    fn on_connected(&self, _url: &str, _report: &mut ProbeReport) -> Result<(), DownloadError> {
        Ok(())
    }

    /// Workers are about to start. `total_bytes` is `None` when the server
    /// did not declare a content length.
    fn on_download_started(&self, _total_bytes: Option<u64>) {}

    /// Aggregate progress: bytes transferred so far across all chunks.
    fn on_download_progress(&self, _bytes_transferred: u64) {}

    /// The run ended. `error` is `None` on success; `final_path` is the
    /// artifact's actual location, which may carry a numbered suffix.
    fn on_download_finished(
        &self,
        _bytes_transferred: u64,
        _error: Option<&DownloadError>,
        _final_path: Option<&Path>,
    ) {
    }

    /// The merge phase is starting over `chunk_count` chunks.
    fn on_merge_started(&self, _chunk_count: usize) {}

    /// Bytes of chunk `chunk_index` copied into the merge output so far.
    fn on_merge_progress(&self, _chunk_index: usize, _chunk_count: usize, _chunk_bytes: u64) {}

    /// The merge phase ended.
    fn on_merge_finished(&self, _error: Option<&DownloadError>) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl DownloadObserver for NullObserver {}
