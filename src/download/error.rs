//! Error types for the download module.
//!
//! This module defines structured errors for every stage of a download run:
//! input validation, environment checks, the HTTP transfer itself, per-chunk
//! retry exhaustion, cancellation, and the merge phase. The `Display`
//! implementation of [`DownloadError`] is the canonical error-code-to-text
//! mapping consumers are expected to show to users; it is stable API surface.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during a download run.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// No URL was supplied on the task.
    #[error("no URL specified")]
    UrlNotDefined,

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The task carries no output file name.
    #[error("no output file name specified")]
    NoOutputFile,

    /// The requested byte range is inverted or otherwise unusable.
    #[error("invalid byte range: {from}-{to}")]
    InvalidRange {
        /// First byte of the requested range.
        from: u64,
        /// Last byte of the requested range, or "-" when unbounded.
        to: String,
    },

    /// The configured temporary directory does not exist.
    #[error("temporary directory not found: {path}")]
    TempDirMissing {
        /// The missing directory.
        path: PathBuf,
    },

    /// The configured merge directory does not exist.
    #[error("merge directory not found: {path}")]
    MergeDirMissing {
        /// The missing directory.
        path: PathBuf,
    },

    /// A filesystem volume backing one of the run's directories is not ready.
    #[error("volume not ready for {path}")]
    VolumeNotReady {
        /// The path whose volume failed the readiness check.
        path: PathBuf,
    },

    /// Network-level error (DNS resolution, connection refused, TLS, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    ///
    /// Raw upstream status codes pass through unchanged; the orchestrator
    /// never remaps them.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The server answered without a readable body.
    #[error("no content received from {url}")]
    NullContent {
        /// The URL whose response carried no body.
        url: String,
    },

    /// The server reported success but the content is empty.
    #[error("zero-length content at {url}")]
    ZeroLengthContent {
        /// The URL whose content length was zero.
        url: String,
    },

    /// The body stream ended before the declared content length was reached.
    #[error("incomplete data read: expected {expected} bytes, got {actual}")]
    IncompleteRead {
        /// Bytes the server declared for this response.
        expected: u64,
        /// Bytes actually received.
        actual: u64,
    },

    /// A chunk exhausted its retry budget.
    #[error("out of tries after {attempts} attempts")]
    OutOfTries {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The caller stopped the run.
    #[error("download canceled by user")]
    Canceled,

    /// The run was aborted internally, typically because a sibling chunk
    /// failed first. Kept distinct from [`DownloadError::Canceled`] so a
    /// user-requested stop is never reported as an error.
    #[error("download aborted")]
    Aborted,

    /// Creating the merge output file failed.
    #[error("failed to create output file {path}: {source}")]
    CreateFile {
        /// The path that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Appending chunks into the final artifact failed.
    #[error("failed to merge chunks into {path}: {source}")]
    MergeFailed {
        /// The merge output path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// File system error during download (create chunk file, write, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The connected-hook vetoed the run.
    #[error("download rejected: {message}")]
    Rejected {
        /// Caller-supplied reason.
        message: String,
    },

    /// A worker task failed outside the normal error flow (panic or runtime
    /// failure). Mapped to a generic code per the unknown/fatal tier.
    #[error("download task failed: {message}")]
    TaskFailed {
        /// Description of the failure.
        message: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an invalid range error.
    pub fn invalid_range(from: u64, to: Option<u64>) -> Self {
        Self::InvalidRange {
            from,
            to: to.map_or_else(|| "-".to_string(), |t| t.to_string()),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an incomplete-read error.
    pub fn incomplete_read(expected: u64, actual: u64) -> Self {
        Self::IncompleteRead { expected, actual }
    }

    /// Returns true for the two cancellation outcomes.
    ///
    /// The first-failure-wins logic uses this to avoid recording an induced
    /// stop as the run's root cause.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled | Self::Aborted)
    }

    /// Returns the upstream HTTP status code, when this error carries one.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// Note on From trait implementations:
// We intentionally do NOT implement `From<reqwest::Error>` or
// `From<std::io::Error>` because our error variants require context
// (url, path) that the source errors don't provide. The helper constructor
// methods are the pattern here.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display_passes_code_through() {
        let error = DownloadError::http_status("https://example.com/file.bin", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(
            msg.contains("https://example.com/file.bin"),
            "Expected URL in: {msg}"
        );
    }

    #[test]
    fn test_invalid_range_display_unbounded() {
        let error = DownloadError::invalid_range(500, None);
        assert_eq!(error.to_string(), "invalid byte range: 500--");
    }

    #[test]
    fn test_invalid_range_display_bounded() {
        let error = DownloadError::invalid_range(500, Some(100));
        assert_eq!(error.to_string(), "invalid byte range: 500-100");
    }

    #[test]
    fn test_io_display_contains_path() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = DownloadError::io(PathBuf::from("/tmp/test.bin"), io_error);
        assert!(error.to_string().contains("/tmp/test.bin"));
    }

    #[test]
    fn test_is_cancellation_only_for_cancel_variants() {
        assert!(DownloadError::Canceled.is_cancellation());
        assert!(DownloadError::Aborted.is_cancellation());
        assert!(!DownloadError::UrlNotDefined.is_cancellation());
        assert!(!DownloadError::http_status("http://example.com", 500).is_cancellation());
    }

    #[test]
    fn test_status_code_extraction() {
        assert_eq!(
            DownloadError::http_status("http://example.com", 503).status_code(),
            Some(503)
        );
        assert_eq!(DownloadError::Canceled.status_code(), None);
    }

    #[test]
    fn test_canceled_message_is_not_an_error_message() {
        // Shown to the user after they asked to stop; must not read as a failure.
        let msg = DownloadError::Canceled.to_string();
        assert!(msg.contains("canceled by user"), "got: {msg}");
    }

    #[test]
    fn test_incomplete_read_display() {
        let error = DownloadError::incomplete_read(1000, 400);
        let msg = error.to_string();
        assert!(msg.contains("1000"));
        assert!(msg.contains("400"));
    }
}
