//! Constants for the download module (timeouts, intervals, defaults).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default number of concurrent chunk workers.
pub const DEFAULT_THREAD_COUNT: usize = 2;

/// Default per-chunk attempt budget. Zero means unlimited retries.
pub const DEFAULT_TRY_LIMIT: u32 = 1;

/// Default throttle for download progress reports.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Default throttle for merge progress reports.
pub const DEFAULT_MERGE_UPDATE_INTERVAL: Duration = Duration::from_millis(100);
