//! Chunk worker: downloads one byte range of the resource into one sink.
//!
//! Each worker owns its HTTP GET, its retry budget, and its resume logic.
//! Failures split into two tiers: an HTTP-level error response fails the
//! chunk immediately with the upstream status, while a broken body copy
//! (I/O error, short read) is retried against the resume offset until the
//! attempt budget runs out. When the server does not honor range requests a
//! partial sink cannot be resumed, so the retry restarts the sink at offset
//! zero instead; a ranged request to such a server silently returns the full
//! body from offset 0, which would corrupt a naive resume.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::TryStreamExt;
use reqwest::header::HeaderMap;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::copier::{self, CopyError};
use super::error::DownloadError;
use super::planner::ChunkSpan;
use super::sink::ChunkSink;
use super::task::ByteRange;
use super::transport::{self, HttpTransport};

/// Shared cancellation state for one run.
///
/// One token per run; `user_stop` records whether the caller asked for the
/// stop, so a worker interrupted by a sibling's failure reports `Aborted`
/// while a caller-initiated stop reports `Canceled`.
#[derive(Debug, Clone)]
pub(crate) struct RunSignals {
    pub cancel: CancellationToken,
    pub user_stop: Arc<AtomicBool>,
}

impl RunSignals {
    pub(crate) fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            user_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The cancellation outcome matching which signal was raised.
    pub(crate) fn cancel_error(&self) -> DownloadError {
        if self.user_stop.load(Ordering::SeqCst) {
            DownloadError::Canceled
        } else {
            DownloadError::Aborted
        }
    }
}

/// Downloads one planned chunk into its sink.
#[derive(Debug)]
pub(crate) struct ChunkWorker {
    pub chunk_id: usize,
    pub url: String,
    pub headers: HeaderMap,
    pub span: ChunkSpan,
    /// Attempt budget; 0 = infinite.
    pub try_limit: u32,
    /// Result of the orchestrator's upfront range-support probe.
    pub ranges_supported: bool,
    pub buffer_size: usize,
    pub update_interval: Duration,
}

impl ChunkWorker {
    /// Runs the worker to completion, returning total bytes written to the
    /// sink. `on_progress` receives the running per-chunk byte count,
    /// throttled to the update interval.
    ///
    /// # Errors
    ///
    /// HTTP statuses pass through as [`DownloadError::HttpStatus`];
    /// cancellation surfaces as `Canceled` or `Aborted` depending on the
    /// raised signal; a spent retry budget yields
    /// [`DownloadError::OutOfTries`].
    pub(crate) async fn run<F>(
        &self,
        transport: &HttpTransport,
        sink: &mut ChunkSink,
        signals: &RunSignals,
        mut on_progress: F,
    ) -> Result<u64, DownloadError>
    where
        F: FnMut(u64) + Send,
    {
        let mut written: u64 = 0;
        let mut attempt: u32 = 1;
        let infinite = self.try_limit == 0;

        loop {
            if signals.cancel.is_cancelled() {
                return Err(signals.cancel_error());
            }

            // Resume point: everything already in the sink stays; the next
            // request continues right after it.
            let range = ByteRange {
                from: self.span.from + written,
                to: self.span.to,
            };
            debug!(
                chunk = self.chunk_id,
                attempt,
                range = %range.header_value(),
                "requesting chunk"
            );

            // Request-level failures (HTTP status, network) are permanent for
            // this chunk; only the body copy below participates in retries.
            // The header exchange is a suspension point too, so it races the
            // cancellation signal.
            let response = tokio::select! {
                () = signals.cancel.cancelled() => return Err(signals.cancel_error()),
                response = transport.fetch_range(&self.url, &self.headers, Some(&range)) => {
                    response?
                }
            };

            if response.status() == reqwest::StatusCode::NO_CONTENT {
                return Err(DownloadError::NullContent {
                    url: self.url.clone(),
                });
            }

            let declared = transport::declared_length(&response);
            if declared == Some(0) {
                return Err(DownloadError::ZeroLengthContent {
                    url: self.url.clone(),
                });
            }

            let body = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));

            let base = written;
            let copy_result = copier::copy_stream(
                body,
                sink,
                self.buffer_size,
                &signals.cancel,
                self.update_interval,
                |n| on_progress(base + n),
            )
            .await;

            let failure = match copy_result {
                Ok(copied) => {
                    written += copied;
                    match declared {
                        Some(expected) if copied < expected => {
                            DownloadError::incomplete_read(expected, copied)
                        }
                        None if written == 0 => {
                            // No error, no declared length, no bytes: the
                            // server sent nothing.
                            return Err(DownloadError::ZeroLengthContent {
                                url: self.url.clone(),
                            });
                        }
                        _ => {
                            on_progress(written);
                            return Ok(written);
                        }
                    }
                }
                Err(CopyError::Canceled { .. }) => return Err(signals.cancel_error()),
                Err(CopyError::Io {
                    bytes_copied,
                    source,
                }) => {
                    written += bytes_copied;
                    DownloadError::io(
                        sink.path().map(Path::to_path_buf).unwrap_or_default(),
                        source,
                    )
                }
            };

            if !infinite && attempt >= self.try_limit {
                warn!(
                    chunk = self.chunk_id,
                    attempts = attempt,
                    error = %failure,
                    "chunk retry budget exhausted"
                );
                return Err(DownloadError::OutOfTries { attempts: attempt });
            }

            attempt += 1;
            debug!(
                chunk = self.chunk_id,
                attempt,
                written,
                error = %failure,
                "retrying chunk"
            );

            if !self.ranges_supported {
                // The server returns the full body regardless of the Range
                // header, so the partial sink is unusable.
                sink.reset().await.map_err(|e| {
                    DownloadError::io(sink.path().map(Path::to_path_buf).unwrap_or_default(), e)
                })?;
                written = 0;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn worker(url: String, span: ChunkSpan, try_limit: u32, ranges_supported: bool) -> ChunkWorker {
        ChunkWorker {
            chunk_id: span.index,
            url,
            headers: HeaderMap::new(),
            span,
            try_limit,
            ranges_supported,
            buffer_size: 1024,
            update_interval: Duration::from_millis(100),
        }
    }

    /// Minimal hand-rolled HTTP server that can truncate responses
    /// mid-body, which wiremock cannot simulate. `truncate_first` cuts the
    /// first N connections short after half the payload; `honor_range`
    /// controls whether the Range header is respected or the full body is
    /// returned with a 200.
    struct FlakyServer {
        addr: std::net::SocketAddr,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl FlakyServer {
        async fn start(body: Vec<u8>, truncate_first: usize, honor_range: bool) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let requests = Arc::new(Mutex::new(Vec::new()));
            let seen = Arc::clone(&requests);
            let connections = Arc::new(AtomicUsize::new(0));

            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    let n = connections.fetch_add(1, Ordering::SeqCst);
                    let body = body.clone();
                    let seen = Arc::clone(&seen);
                    tokio::spawn(async move {
                        serve_connection(stream, body, n < truncate_first, honor_range, seen)
                            .await;
                    });
                }
            });

            Self { addr, requests }
        }

        fn url(&self) -> String {
            format!("http://{}/payload.bin", self.addr)
        }

        fn range_headers(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    async fn serve_connection(
        mut stream: TcpStream,
        body: Vec<u8>,
        truncate: bool,
        honor_range: bool,
        seen: Arc<Mutex<Vec<String>>>,
    ) {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        let request = String::from_utf8_lossy(&request).into_owned();

        let range = request
            .lines()
            .find_map(|line| line.strip_prefix("Range: "))
            .map(str::to_string);
        seen.lock()
            .unwrap()
            .push(range.clone().unwrap_or_default());

        let (status, slice) = match range.as_deref().and_then(ByteRange::parse_header_value) {
            Some(r) if honor_range => {
                let from = usize::try_from(r.from).unwrap();
                let to = r
                    .to
                    .map_or(body.len() - 1, |t| usize::try_from(t).unwrap())
                    .min(body.len() - 1);
                ("206 Partial Content", body[from..=to].to_vec())
            }
            _ => ("200 OK", body),
        };

        let head = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            slice.len()
        );
        let _ = stream.write_all(head.as_bytes()).await;
        let sent = if truncate { slice.len() / 2 } else { slice.len() };
        let _ = stream.write_all(&slice[..sent]).await;
        let _ = stream.flush().await;
        // Dropping the stream closes the connection; a truncated body shows
        // up client-side as a short read against Content-Length.
    }

    #[tokio::test]
    async fn test_worker_downloads_full_chunk() {
        let mock_server = MockServer::start().await;
        let content = vec![42u8; 500];
        Mock::given(method("GET"))
            .and(path("/chunk.bin"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(content.clone()))
            .mount(&mock_server)
            .await;

        let span = ChunkSpan {
            index: 0,
            from: 0,
            to: Some(499),
        };
        let w = worker(format!("{}/chunk.bin", mock_server.uri()), span, 1, true);
        let mut sink = ChunkSink::memory(None);
        let signals = RunSignals::new();

        let written = w
            .run(&HttpTransport::new(), &mut sink, &signals, |_| {})
            .await
            .unwrap();

        assert_eq!(written, 500);
        let mut out = Vec::new();
        let cancel = CancellationToken::new();
        sink.consume_into(&mut out, 64, &cancel, Duration::from_millis(100), |_| {})
            .await
            .unwrap();
        assert_eq!(out, content);
    }

    #[tokio::test]
    async fn test_worker_http_error_passes_status_through() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.bin"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let span = ChunkSpan {
            index: 0,
            from: 0,
            to: Some(99),
        };
        let w = worker(format!("{}/gone.bin", mock_server.uri()), span, 3, true);
        let mut sink = ChunkSink::memory(None);
        let signals = RunSignals::new();

        let result = w
            .run(&HttpTransport::new(), &mut sink, &signals, |_| {})
            .await;

        // No retries for HTTP-level errors, even with budget left.
        match result {
            Err(DownloadError::HttpStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("Expected HttpStatus, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_worker_zero_length_content() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(Vec::new()))
            .mount(&mock_server)
            .await;

        let span = ChunkSpan {
            index: 0,
            from: 0,
            to: None,
        };
        let w = worker(format!("{}/empty.bin", mock_server.uri()), span, 1, false);
        let mut sink = ChunkSink::memory(None);
        let signals = RunSignals::new();

        let result = w
            .run(&HttpTransport::new(), &mut sink, &signals, |_| {})
            .await;

        assert!(matches!(
            result,
            Err(DownloadError::ZeroLengthContent { .. })
        ));
    }

    #[tokio::test]
    async fn test_worker_canceled_before_start_reports_user_cancel() {
        let span = ChunkSpan {
            index: 0,
            from: 0,
            to: Some(99),
        };
        let w = worker("http://127.0.0.1:1/unused".to_string(), span, 1, true);
        let mut sink = ChunkSink::memory(None);
        let signals = RunSignals::new();
        signals.user_stop.store(true, Ordering::SeqCst);
        signals.cancel.cancel();

        let result = w
            .run(&HttpTransport::new(), &mut sink, &signals, |_| {})
            .await;

        assert!(matches!(result, Err(DownloadError::Canceled)));
    }

    #[tokio::test]
    async fn test_worker_aborted_when_cancel_not_user_initiated() {
        let span = ChunkSpan {
            index: 0,
            from: 0,
            to: Some(99),
        };
        let w = worker("http://127.0.0.1:1/unused".to_string(), span, 1, true);
        let mut sink = ChunkSink::memory(None);
        let signals = RunSignals::new();
        signals.cancel.cancel();

        let result = w
            .run(&HttpTransport::new(), &mut sink, &signals, |_| {})
            .await;

        assert!(matches!(result, Err(DownloadError::Aborted)));
    }

    #[tokio::test]
    async fn test_worker_resumes_from_last_good_offset() {
        let body: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let server = FlakyServer::start(body.clone(), 1, true).await;

        let span = ChunkSpan {
            index: 0,
            from: 0,
            to: Some(999),
        };
        let w = worker(server.url(), span, 3, true);
        let mut sink = ChunkSink::memory(None);
        let signals = RunSignals::new();

        let written = w
            .run(&HttpTransport::new(), &mut sink, &signals, |_| {})
            .await
            .unwrap();
        assert_eq!(written, 1000);

        // Second request must resume exactly where the truncated first
        // response left off (500 of 1000 bytes).
        let ranges = server.range_headers();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0], "bytes=0-999");
        assert_eq!(ranges[1], "bytes=500-999");

        let mut out = Vec::new();
        let cancel = CancellationToken::new();
        sink.consume_into(&mut out, 64, &cancel, Duration::from_millis(100), |_| {})
            .await
            .unwrap();
        assert_eq!(out, body, "resumed sink must reproduce the chunk exactly");
    }

    #[tokio::test]
    async fn test_worker_restarts_sink_when_ranges_unsupported() {
        let body: Vec<u8> = (0..=255u8).cycle().take(800).collect();
        let server = FlakyServer::start(body.clone(), 1, false).await;

        let span = ChunkSpan {
            index: 0,
            from: 0,
            to: None,
        };
        let w = worker(server.url(), span, 3, false);
        let mut sink = ChunkSink::memory(None);
        let signals = RunSignals::new();

        let written = w
            .run(&HttpTransport::new(), &mut sink, &signals, |_| {})
            .await
            .unwrap();
        assert_eq!(written, 800);

        // The retry discards prior bytes and restarts from zero rather than
        // resuming against a server that ignores Range.
        let ranges = server.range_headers();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1], "bytes=0-");

        let mut out = Vec::new();
        let cancel = CancellationToken::new();
        sink.consume_into(&mut out, 64, &cancel, Duration::from_millis(100), |_| {})
            .await
            .unwrap();
        assert_eq!(out, body, "restarted sink must not contain stale bytes");
    }

    #[tokio::test]
    async fn test_worker_out_of_tries_after_budget_spent() {
        let body = vec![7u8; 600];
        // Every connection truncates: the worker can never finish.
        let server = FlakyServer::start(body, usize::MAX, true).await;

        let span = ChunkSpan {
            index: 0,
            from: 0,
            to: Some(599),
        };
        let w = worker(server.url(), span, 2, true);
        let mut sink = ChunkSink::memory(None);
        let signals = RunSignals::new();

        let result = w
            .run(&HttpTransport::new(), &mut sink, &signals, |_| {})
            .await;

        match result {
            Err(DownloadError::OutOfTries { attempts }) => assert_eq!(attempts, 2),
            other => panic!("Expected OutOfTries, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_worker_infinite_tries_eventually_completes() {
        let body = vec![9u8; 400];
        // First three connections truncate, fourth succeeds; try_limit 0
        // keeps retrying until it gets there.
        let server = FlakyServer::start(body.clone(), 3, true).await;

        let span = ChunkSpan {
            index: 0,
            from: 0,
            to: Some(399),
        };
        let w = worker(server.url(), span, 0, true);
        let mut sink = ChunkSink::memory(None);
        let signals = RunSignals::new();

        let written = w
            .run(&HttpTransport::new(), &mut sink, &signals, |_| {})
            .await
            .unwrap();
        assert_eq!(written, 400);
    }

    #[tokio::test]
    async fn test_worker_reports_progress() {
        let mock_server = MockServer::start().await;
        let content = vec![1u8; 2048];
        Mock::given(method("GET"))
            .and(path("/progress.bin"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(content))
            .mount(&mock_server)
            .await;

        let span = ChunkSpan {
            index: 0,
            from: 0,
            to: Some(2047),
        };
        let mut w = worker(format!("{}/progress.bin", mock_server.uri()), span, 1, true);
        w.update_interval = Duration::ZERO;
        let mut sink = ChunkSink::memory(None);
        let signals = RunSignals::new();

        let reported = Arc::new(Mutex::new(Vec::new()));
        let reported_in_cb = Arc::clone(&reported);
        let written = w
            .run(&HttpTransport::new(), &mut sink, &signals, move |n| {
                reported_in_cb.lock().unwrap().push(n);
            })
            .await
            .unwrap();

        let reported = reported.lock().unwrap();
        assert_eq!(written, 2048);
        assert_eq!(*reported.last().unwrap(), 2048);
        assert!(reported.windows(2).all(|w| w[0] <= w[1]));
    }
}
