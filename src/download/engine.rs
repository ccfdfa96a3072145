//! Download orchestrator: validates the task, probes the server, fans out
//! chunk workers, aggregates progress, and finalizes the artifact.
//!
//! # Overview
//!
//! One [`Downloader::download`] call is one run. The orchestrator splits the
//! effective byte range into chunks (one worker task per chunk), watches the
//! workers through a shared progress map, and applies first-failure-wins
//! abort: the first chunk to fail with a real error cancels the run's shared
//! token, every other worker stops and reports `Aborted`, and only the first
//! error surfaces as the run's result.
//!
//! # Example
//!
//! ```no_run
//! use splitget_core::download::{DownloadTask, Downloader, HttpTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::new(HttpTransport::new());
//! let mut task = DownloadTask::new("https://example.com/big.iso", "./big.iso");
//! task.thread_count = 4;
//! let outcome = downloader.download(&task).await?;
//! println!("saved {} bytes to {}", outcome.bytes_transferred, outcome.final_path.display());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::error::DownloadError;
use super::events::{DownloadObserver, NullObserver};
use super::filename::numbered_path;
use super::fsys::{rename_or_copy, volume_ready};
use super::merge::{self, MergePlan};
use super::planner::plan_chunks;
use super::sink::ChunkSink;
use super::task::{ByteRange, DownloadTask};
use super::transport::HttpTransport;
use super::worker::{ChunkWorker, RunSignals};

/// Result of a successful download run.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// Where the artifact actually landed. May differ from the requested
    /// output path when a name collision forced a numbered suffix.
    pub final_path: PathBuf,
    /// Total bytes transferred across all chunks.
    pub bytes_transferred: u64,
}

/// Orchestrates chunked download runs.
///
/// The downloader is cheap to share behind an `Arc`; [`Downloader::stop`]
/// cancels the run currently in flight from any thread.
pub struct Downloader {
    transport: HttpTransport,
    observer: Arc<dyn DownloadObserver>,
    active: Mutex<Option<RunSignals>>,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader").finish_non_exhaustive()
    }
}

impl Downloader {
    /// Creates a downloader that emits no events.
    #[must_use]
    pub fn new(transport: HttpTransport) -> Self {
        Self::with_observer(transport, Arc::new(NullObserver))
    }

    /// Creates a downloader forwarding run events to `observer`.
    #[must_use]
    pub fn with_observer(transport: HttpTransport, observer: Arc<dyn DownloadObserver>) -> Self {
        Self {
            transport,
            observer,
            active: Mutex::new(None),
        }
    }

    /// Stops the run currently in flight, if any.
    ///
    /// The run finishes with [`DownloadError::Canceled`] and every
    /// intermediate sink is destroyed. A no-op when nothing is running.
    pub fn stop(&self) {
        let guard = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(signals) = guard.as_ref() {
            info!("stop requested");
            signals.user_stop.store(true, Ordering::SeqCst);
            signals.cancel.cancel();
        }
    }

    /// Runs `task` to completion.
    ///
    /// # Errors
    ///
    /// Validation and environment errors return before any network traffic.
    /// Per-chunk failures follow first-failure-wins: exactly one error code
    /// describes the run. A caller-initiated stop returns
    /// [`DownloadError::Canceled`].
    #[instrument(skip(self, task), fields(url = %task.url))]
    pub async fn download(&self, task: &DownloadTask) -> Result<DownloadOutcome, DownloadError> {
        let signals = RunSignals::new();
        {
            let mut guard = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            *guard = Some(signals.clone());
        }

        let (bytes_transferred, result) = self.run(task, &signals).await;

        {
            let mut guard = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            *guard = None;
        }

        self.observer.on_download_finished(
            bytes_transferred,
            result.as_ref().err(),
            result.as_ref().ok().map(PathBuf::as_path),
        );

        result.map(|final_path| DownloadOutcome {
            final_path,
            bytes_transferred,
        })
    }

    async fn run(
        &self,
        task: &DownloadTask,
        signals: &RunSignals,
    ) -> (u64, Result<PathBuf, DownloadError>) {
        let env = match validate_task(task) {
            Ok(env) => env,
            Err(e) => return (0, Err(e)),
        };

        self.observer.on_connecting(&task.url);

        let mut report = match self.transport.probe(&task.url, &env.headers).await {
            Ok(report) => report,
            Err(e) => return (0, Err(e)),
        };

        if let Err(e) = self.observer.on_connected(&task.url, &mut report) {
            return (0, Err(e));
        }
        if report.status != 200 && report.status != 206 {
            return (0, Err(DownloadError::http_status(&task.url, report.status)));
        }

        let range_from = env.range.map_or(0, |r| r.from);
        let range_to = env.range.and_then(|r| r.to);
        let effective_length = match effective_length(report.content_length, env.range) {
            Ok(len) => len,
            Err(e) => return (0, Err(e)),
        };
        if effective_length == Some(0) {
            return (
                0,
                Err(DownloadError::ZeroLengthContent {
                    url: task.url.clone(),
                }),
            );
        }

        // An unknown length leaves no way to precompute absolute ranges, so
        // it forces a single chunk, as does a server without range support.
        let chunk_count = if !report.accepts_ranges || effective_length.is_none() {
            1
        } else {
            task.thread_count.max(1)
        };

        let spans = match plan_chunks(range_from, range_to, effective_length, chunk_count) {
            Ok(spans) => spans,
            Err(e) => return (0, Err(e)),
        };

        debug!(
            chunks = spans.len(),
            ?effective_length,
            accepts_ranges = report.accepts_ranges,
            "chunk plan ready"
        );
        self.observer.on_download_started(effective_length);

        let mut sinks = Vec::with_capacity(spans.len());
        for span in &spans {
            let sink = if task.use_memory_sinks {
                Ok(ChunkSink::memory(span.len()))
            } else {
                let name = format!(
                    "{}.chunk_{}.tmp",
                    env.file_name.to_string_lossy(),
                    span.index
                );
                ChunkSink::create_file(numbered_path(&env.temp_dir.join(name))).await
            };
            match sink {
                Ok(sink) => sinks.push(sink),
                Err(e) => {
                    merge::discard_all(sinks).await;
                    return (0, Err(e));
                }
            }
        }

        let progress: Arc<DashMap<usize, u64>> = Arc::new(DashMap::new());
        let first_error: Arc<Mutex<Option<DownloadError>>> = Arc::new(Mutex::new(None));

        let mut handles: Vec<JoinHandle<(usize, ChunkSink, Option<u64>)>> =
            Vec::with_capacity(spans.len());
        for (span, mut sink) in spans.iter().copied().zip(sinks) {
            let worker = ChunkWorker {
                chunk_id: span.index,
                url: task.url.clone(),
                headers: env.headers.clone(),
                span,
                try_limit: task.try_limit,
                ranges_supported: report.accepts_ranges,
                buffer_size: task.buffer_size,
                update_interval: task.update_interval,
            };
            let transport = self.transport.clone();
            let signals = signals.clone();
            let observer = Arc::clone(&self.observer);
            let progress = Arc::clone(&progress);
            let first_error = Arc::clone(&first_error);

            handles.push(tokio::spawn(async move {
                let chunk_id = worker.chunk_id;
                let result = worker
                    .run(&transport, &mut sink, &signals, |bytes| {
                        // Each worker owns its own entry; only the summation
                        // races with writes, and per-entry reads are coherent.
                        progress.insert(chunk_id, bytes);
                        let total: u64 = progress.iter().map(|e| *e.value()).sum();
                        observer.on_download_progress(total);
                    })
                    .await;

                let bytes = match result {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        if !e.is_cancellation() {
                            let mut slot =
                                first_error.lock().unwrap_or_else(PoisonError::into_inner);
                            if slot.is_none() {
                                // First real failure wins: it becomes the
                                // run's error and stops every sibling.
                                *slot = Some(e);
                                drop(slot);
                                signals.cancel.cancel();
                            } else {
                                warn!(chunk = chunk_id, error = %e, "secondary chunk failure");
                            }
                        }
                        None
                    }
                };
                (chunk_id, sink, bytes)
            }));
        }

        let mut outcomes: Vec<(usize, ChunkSink, Option<u64>)> = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    let mut slot = first_error.lock().unwrap_or_else(PoisonError::into_inner);
                    if slot.is_none() {
                        *slot = Some(DownloadError::TaskFailed {
                            message: e.to_string(),
                        });
                    }
                    drop(slot);
                    signals.cancel.cancel();
                }
            }
        }
        outcomes.sort_by_key(|(chunk_id, _, _)| *chunk_id);

        let total_bytes: u64 = progress.iter().map(|e| *e.value()).sum();
        let sinks: Vec<ChunkSink> = {
            let mut collected = Vec::with_capacity(outcomes.len());
            let mut failed = false;
            for (_, sink, bytes) in outcomes {
                failed |= bytes.is_none();
                collected.push(sink);
            }
            let user_stopped = signals.user_stop.load(Ordering::SeqCst);
            let stored = first_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if user_stopped {
                merge::discard_all(collected).await;
                return (total_bytes, Err(DownloadError::Canceled));
            }
            if let Some(e) = stored {
                merge::discard_all(collected).await;
                return (total_bytes, Err(e));
            }
            if failed {
                merge::discard_all(collected).await;
                return (
                    total_bytes,
                    Err(DownloadError::TaskFailed {
                        message: "chunk finished without a result".to_string(),
                    }),
                );
            }
            collected
        };

        let final_path = if sinks.len() == 1 && sinks[0].is_file() {
            // One file-backed chunk is already the whole artifact; move it
            // into place instead of copying through the merge engine.
            self.finalize_single_chunk(sinks, task, &env).await
        } else {
            self.observer.on_merge_started(sinks.len());
            let merged = merge::merge_chunks(
                sinks,
                &MergePlan {
                    output_path: &env.output_path,
                    merge_dir: &env.merge_dir,
                    keep_in_merge_dir: task.keep_in_merge_dir,
                    buffer_size: task.buffer_size,
                    update_interval: task.merge_update_interval,
                },
                signals,
                self.observer.as_ref(),
            )
            .await;
            self.observer.on_merge_finished(merged.as_ref().err());
            merged
        };

        match final_path {
            Ok(path) => {
                info!(path = %path.display(), bytes = total_bytes, "download complete");
                (total_bytes, Ok(path))
            }
            Err(e) => (total_bytes, Err(e)),
        }
    }

    async fn finalize_single_chunk(
        &self,
        sinks: Vec<ChunkSink>,
        task: &DownloadTask,
        env: &RunEnv,
    ) -> Result<PathBuf, DownloadError> {
        let mut sinks = sinks;
        let sink = sinks.remove(0);
        let Some(chunk_path) = sink.into_file_path().await else {
            return Err(DownloadError::TaskFailed {
                message: "single-chunk fast path requires a file-backed sink".to_string(),
            });
        };

        let dest_dir = if task.keep_in_merge_dir {
            chunk_path
                .parent()
                .map_or_else(|| env.temp_dir.clone(), Path::to_path_buf)
        } else {
            env.output_path
                .parent()
                .map_or_else(|| env.temp_dir.clone(), Path::to_path_buf)
        };
        let final_path = numbered_path(&dest_dir.join(&env.file_name));

        match rename_or_copy(&chunk_path, &final_path).await {
            Ok(()) => Ok(final_path),
            Err(source) => {
                let _ = tokio::fs::remove_file(&chunk_path).await;
                Err(DownloadError::io(final_path, source))
            }
        }
    }
}

/// Validated, resolved environment for one run.
struct RunEnv {
    output_path: PathBuf,
    file_name: std::ffi::OsString,
    temp_dir: PathBuf,
    merge_dir: PathBuf,
    headers: reqwest::header::HeaderMap,
    range: Option<ByteRange>,
}

/// Checks inputs and resolves directories. No network traffic happens here;
/// every failure is returned synchronously.
fn validate_task(task: &DownloadTask) -> Result<RunEnv, DownloadError> {
    if task.url.trim().is_empty() {
        return Err(DownloadError::UrlNotDefined);
    }
    if Url::parse(&task.url).is_err() {
        return Err(DownloadError::invalid_url(task.url.clone()));
    }

    let file_name = match task.output_path.file_name() {
        Some(name) if !name.is_empty() => name.to_os_string(),
        _ => return Err(DownloadError::NoOutputFile),
    };

    let (headers, range) = task.effective_headers_and_range();
    if let Some(r) = range
        && let Some(to) = r.to
        && to < r.from
    {
        return Err(DownloadError::invalid_range(r.from, Some(to)));
    }

    let output_path = if task.output_path.is_absolute() {
        task.output_path.clone()
    } else {
        std::env::current_dir()
            .map_err(|e| DownloadError::io(task.output_path.clone(), e))?
            .join(&task.output_path)
    };

    let output_parent = output_path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let temp_dir = match &task.temp_dir {
        Some(dir) => {
            if !task.use_memory_sinks && !dir.is_dir() {
                return Err(DownloadError::TempDirMissing { path: dir.clone() });
            }
            dir.clone()
        }
        None => output_parent.clone(),
    };

    let merge_dir = match &task.merge_dir {
        Some(dir) => {
            if !dir.is_dir() {
                return Err(DownloadError::MergeDirMissing { path: dir.clone() });
            }
            dir.clone()
        }
        None => temp_dir.clone(),
    };

    for dir in [&output_parent, &temp_dir, &merge_dir] {
        if !volume_ready(dir) {
            return Err(DownloadError::VolumeNotReady { path: dir.clone() });
        }
    }

    Ok(RunEnv {
        output_path,
        file_name,
        temp_dir,
        merge_dir,
        headers,
        range,
    })
}

/// Number of bytes the run will actually transfer, given the probe's total
/// and the task's explicit range.
fn effective_length(
    content_length: Option<u64>,
    range: Option<ByteRange>,
) -> Result<Option<u64>, DownloadError> {
    let Some(range) = range else {
        return Ok(content_length);
    };
    if let Some(to) = range.to {
        return Ok(Some(to - range.from + 1));
    }
    match content_length {
        Some(total) if range.from >= total => {
            Err(DownloadError::invalid_range(range.from, None))
        }
        Some(total) => Ok(Some(total - range.from)),
        None => Ok(None),
    }
}
