//! Download task configuration.
//!
//! One [`DownloadTask`] describes one logical request for one resource. It
//! is the single entry point's configuration structure: every optional knob
//! lives here with a documented default, and the task is immutable once a
//! run starts (the orchestrator borrows it for the duration).

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, RANGE};

use super::constants::{
    DEFAULT_MERGE_UPDATE_INTERVAL, DEFAULT_THREAD_COUNT, DEFAULT_TRY_LIMIT,
    DEFAULT_UPDATE_INTERVAL,
};
use super::copier::DEFAULT_BUFFER_SIZE;
use super::error::DownloadError;

/// An explicit byte range of the target resource.
///
/// `to` is inclusive; `None` requests everything from `from` onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte requested.
    pub from: u64,
    /// Last byte requested, inclusive. `None` = unbounded.
    pub to: Option<u64>,
}

impl ByteRange {
    /// Creates a validated range.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidRange`] when `to < from`.
    pub fn new(from: u64, to: Option<u64>) -> Result<Self, DownloadError> {
        if let Some(to) = to
            && to < from
        {
            return Err(DownloadError::invalid_range(from, Some(to)));
        }
        Ok(Self { from, to })
    }

    /// Renders the range as an HTTP `Range` header value.
    #[must_use]
    pub fn header_value(&self) -> String {
        match self.to {
            Some(to) => format!("bytes={}-{}", self.from, to),
            None => format!("bytes={}-", self.from),
        }
    }

    /// Parses a `Range` header value (`bytes=0-499`, `bytes=500-`, or the
    /// bare `0-499` form). Suffix ranges (`bytes=-500`) are not supported
    /// and return `None`.
    #[must_use]
    pub fn parse_header_value(value: &str) -> Option<Self> {
        let spec = value.trim();
        let spec = spec.strip_prefix("bytes=").unwrap_or(spec);
        let (from_str, to_str) = spec.split_once('-')?;
        let from: u64 = from_str.trim().parse().ok()?;
        let to_str = to_str.trim();
        let to = if to_str.is_empty() {
            None
        } else {
            Some(to_str.parse().ok()?)
        };
        Self::new(from, to).ok()
    }
}

/// Configuration for one download run.
///
/// # Defaults
///
/// - `thread_count`: 2
/// - `try_limit`: 1 (0 = infinite retries per chunk)
/// - `update_interval` / `merge_update_interval`: 100 ms
/// - `buffer_size`: 8192 bytes
/// - disk-backed chunk sinks, temp dir derived from the output path, merge
///   dir falling back to the temp dir
#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// Resource URL.
    pub url: String,
    /// Requested output path. The actual final path may differ when a
    /// collision forces a numbered name.
    pub output_path: PathBuf,
    /// Directory for chunk temp files. `None` derives it from the output
    /// path's parent.
    pub temp_dir: Option<PathBuf>,
    /// Directory the merge output is assembled in. `None` falls back to the
    /// temp directory.
    pub merge_dir: Option<PathBuf>,
    /// Number of concurrent chunk workers (minimum 1).
    pub thread_count: usize,
    /// Per-chunk attempt budget; 0 = infinite.
    pub try_limit: u32,
    /// Extra request headers. A `Range` entry here is parsed and becomes
    /// the task's effective byte range.
    pub headers: HeaderMap,
    /// Optional explicit byte range of the resource.
    pub range: Option<ByteRange>,
    /// Buffer chunks in memory instead of temp files.
    pub use_memory_sinks: bool,
    /// Leave the final artifact in the merge (or temp) directory instead of
    /// next to the requested output path.
    pub keep_in_merge_dir: bool,
    /// Throttle for download progress events.
    pub update_interval: Duration,
    /// Throttle for merge progress events.
    pub merge_update_interval: Duration,
    /// Copy buffer size per worker, in bytes.
    pub buffer_size: usize,
}

impl DownloadTask {
    /// Creates a task with the documented defaults.
    #[must_use]
    pub fn new(url: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            output_path: output_path.into(),
            temp_dir: None,
            merge_dir: None,
            thread_count: DEFAULT_THREAD_COUNT,
            try_limit: DEFAULT_TRY_LIMIT,
            headers: HeaderMap::new(),
            range: None,
            use_memory_sinks: false,
            keep_in_merge_dir: false,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            merge_update_interval: DEFAULT_MERGE_UPDATE_INTERVAL,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Splits the task's headers into outgoing headers and the effective
    /// range. A `Range` header wins over [`DownloadTask::range`]; it is
    /// removed from the outgoing set because workers install their own
    /// per-chunk ranges.
    pub(crate) fn effective_headers_and_range(&self) -> (HeaderMap, Option<ByteRange>) {
        let mut headers = self.headers.clone();
        let header_range = headers
            .remove(RANGE)
            .and_then(|v| v.to_str().ok().map(str::to_string))
            .and_then(|v| ByteRange::parse_header_value(&v));
        (headers, header_range.or(self.range))
    }
}
