//! Cancellable byte-copy primitive with throttled progress reporting.
//!
//! Both the chunk workers (HTTP body -> sink) and the merge engine
//! (sink -> final file) funnel their bytes through [`copy_stream`], so
//! cancellation and progress behave identically in both phases. The copy is
//! interruptible between buffer-sized reads and reports progress at most
//! once per configured interval.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default copy buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Errors produced while copying a stream.
///
/// Both variants carry the number of bytes successfully written before the
/// failure, so callers can resume from the last good offset.
#[derive(Debug, Error)]
pub enum CopyError {
    /// The cancellation token fired between reads.
    #[error("copy canceled after {bytes_copied} bytes")]
    Canceled {
        /// Bytes written to the destination before cancellation.
        bytes_copied: u64,
    },

    /// Reading the source or writing the destination failed.
    #[error("copy failed after {bytes_copied} bytes: {source}")]
    Io {
        /// Bytes written to the destination before the failure.
        bytes_copied: u64,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl CopyError {
    /// Bytes successfully written before the copy stopped.
    #[must_use]
    pub fn bytes_copied(&self) -> u64 {
        match self {
            Self::Canceled { bytes_copied } | Self::Io { bytes_copied, .. } => *bytes_copied,
        }
    }
}

/// Copies `reader` into `writer`, checking for cancellation between reads
/// and invoking `on_progress` with the running byte count at most once per
/// `interval`.
///
/// The final byte count is always delivered through the return value, not
/// the callback, so a throttled-away last tick never loses bytes.
///
/// # Errors
///
/// Returns [`CopyError::Canceled`] when the token fires, or
/// [`CopyError::Io`] on a read/write failure. Both carry the bytes written
/// so far.
pub async fn copy_stream<R, W, F>(
    mut reader: R,
    writer: &mut W,
    buffer_size: usize,
    cancel: &CancellationToken,
    interval: Duration,
    mut on_progress: F,
) -> Result<u64, CopyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let buffer_size = if buffer_size == 0 {
        DEFAULT_BUFFER_SIZE
    } else {
        buffer_size
    };
    let mut buf = vec![0u8; buffer_size];
    let mut bytes_copied: u64 = 0;
    let mut last_report = Instant::now();

    loop {
        let read = tokio::select! {
            () = cancel.cancelled() => {
                return Err(CopyError::Canceled { bytes_copied });
            }
            read = reader.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(source) => {
                return Err(CopyError::Io {
                    bytes_copied,
                    source,
                });
            }
        };

        if let Err(source) = writer.write_all(&buf[..n]).await {
            return Err(CopyError::Io {
                bytes_copied,
                source,
            });
        }
        bytes_copied += n as u64;

        let now = Instant::now();
        if now.duration_since(last_report) >= interval {
            on_progress(bytes_copied);
            last_report = now;
        }
    }

    if let Err(source) = writer.flush().await {
        return Err(CopyError::Io {
            bytes_copied,
            source,
        });
    }

    Ok(bytes_copied)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_copy_stream_preserves_bytes() {
        let source: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let mut dest = Vec::new();
        let cancel = CancellationToken::new();

        let copied = copy_stream(
            source.as_slice(),
            &mut dest,
            64,
            &cancel,
            Duration::from_millis(100),
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(copied, 10_000);
        assert_eq!(dest, source);
    }

    #[tokio::test]
    async fn test_copy_stream_empty_source_copies_zero_bytes() {
        let mut dest = Vec::new();
        let cancel = CancellationToken::new();

        let copied = copy_stream(
            [].as_slice(),
            &mut dest,
            64,
            &cancel,
            Duration::from_millis(100),
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(copied, 0);
        assert!(dest.is_empty());
    }

    #[tokio::test]
    async fn test_copy_stream_zero_buffer_size_uses_default() {
        let source = vec![7u8; 1000];
        let mut dest = Vec::new();
        let cancel = CancellationToken::new();

        let copied = copy_stream(
            source.as_slice(),
            &mut dest,
            0,
            &cancel,
            Duration::from_millis(100),
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(copied, 1000);
    }

    #[tokio::test]
    async fn test_copy_stream_cancellation_stops_copy() {
        let source = vec![1u8; 100_000];
        let mut dest = Vec::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = copy_stream(
            source.as_slice(),
            &mut dest,
            64,
            &cancel,
            Duration::from_millis(100),
            |_| {},
        )
        .await;

        match result {
            Err(CopyError::Canceled { bytes_copied }) => assert_eq!(bytes_copied, 0),
            other => panic!("Expected Canceled, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_copy_stream_progress_is_throttled() {
        let source = vec![9u8; 50_000];
        let mut dest = Vec::new();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU64::new(0));
        let calls_in_cb = Arc::clone(&calls);

        // Interval far larger than the copy duration: the throttle must
        // suppress every intermediate report.
        copy_stream(
            source.as_slice(),
            &mut dest,
            512,
            &cancel,
            Duration::from_secs(60),
            move |_| {
                calls_in_cb.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(dest.len(), 50_000);
    }

    #[tokio::test]
    async fn test_copy_stream_zero_interval_reports_every_buffer() {
        let source = vec![3u8; 4096];
        let mut dest = Vec::new();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU64::new(0));
        let calls_in_cb = Arc::clone(&calls);

        copy_stream(
            source.as_slice(),
            &mut dest,
            1024,
            &cancel,
            Duration::ZERO,
            move |_| {
                calls_in_cb.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_copy_stream_works_outside_tokio_test_macro() {
        let source = vec![4u8; 256];
        let mut dest = Vec::new();
        let cancel = CancellationToken::new();

        let copied = tokio_test::block_on(copy_stream(
            source.as_slice(),
            &mut dest,
            32,
            &cancel,
            Duration::from_millis(100),
            |_| {},
        ))
        .unwrap();

        assert_eq!(copied, 256);
    }

    #[tokio::test]
    async fn test_copy_error_reports_bytes_copied() {
        let err = CopyError::Io {
            bytes_copied: 123,
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"),
        };
        assert_eq!(err.bytes_copied(), 123);
        let err = CopyError::Canceled { bytes_copied: 55 };
        assert_eq!(err.bytes_copied(), 55);
    }
}
