//! HTTP transport for chunk downloads and metadata probes.
//!
//! Thin wrapper around a pooled `reqwest::Client` with the timeouts the rest
//! of the module relies on. The transport is created once per run and shared
//! by every chunk worker, taking advantage of connection pooling.

use std::time::Duration;

use reqwest::header::{ACCEPT_ENCODING, ACCEPT_RANGES, CONTENT_ENCODING, CONTENT_LENGTH, RANGE};
use reqwest::{Client, Response};
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use super::task::ByteRange;

/// Result of the upfront metadata probe (HEAD request).
///
/// The connected-hook receives this mutably and may override the status or
/// content length before the orchestrator judges them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    /// HTTP status the probe ended with.
    pub status: u16,
    /// Total content length of the resource, when the server declared one.
    pub content_length: Option<u64>,
    /// Whether the server advertises `Accept-Ranges: bytes`.
    pub accepts_ranges: bool,
}

/// HTTP transport shared by the orchestrator and its chunk workers.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    /// Creates a transport with default timeouts (30 s connect, 5 min read).
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a transport with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .user_agent(concat!("splitget/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Issues a GET for `range` of `url`, pinning `Accept-Encoding: identity`
    /// so the declared content length counts raw resource bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::HttpStatus`] for non-success responses (the
    /// upstream code passes through unchanged), [`DownloadError::Timeout`]
    /// on request timeout, and [`DownloadError::Network`] for everything
    /// below HTTP.
    #[instrument(level = "debug", skip(self, headers))]
    pub async fn fetch_range(
        &self,
        url: &str,
        headers: &reqwest::header::HeaderMap,
        range: Option<&ByteRange>,
    ) -> Result<Response, DownloadError> {
        let mut request = self
            .client
            .get(url)
            .headers(headers.clone())
            .header(ACCEPT_ENCODING, "identity");
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        Ok(response)
    }

    /// Probes `url` with a HEAD request for content length and range support.
    ///
    /// An HTTP error status is not an `Err` here: the report carries the
    /// status so the connected-hook can inspect or override it before the
    /// orchestrator gives up.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Timeout`] or [`DownloadError::Network`] when
    /// the request never produced a response.
    #[instrument(level = "debug", skip(self, headers))]
    pub async fn probe(
        &self,
        url: &str,
        headers: &reqwest::header::HeaderMap,
    ) -> Result<ProbeReport, DownloadError> {
        let response = self
            .client
            .head(url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DownloadError::timeout(url)
                } else {
                    DownloadError::network(url, e)
                }
            })?;

        let status = response.status().as_u16();
        let content_length = header_u64(&response, &CONTENT_LENGTH);
        let accepts_ranges = response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));

        debug!(status, ?content_length, accepts_ranges, "probe complete");

        Ok(ProbeReport {
            status,
            content_length,
            accepts_ranges,
        })
    }
}

/// Bytes the server declared for this response's body.
///
/// Returns `None` when the response is content-encoded (the wire length no
/// longer matches resource bytes, so short-read detection must be skipped)
/// or when the server omitted `Content-Length`.
#[must_use]
pub fn declared_length(response: &Response) -> Option<u64> {
    let encoded = response
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.eq_ignore_ascii_case("identity"));
    if encoded {
        return None;
    }
    header_u64(response, &CONTENT_LENGTH)
}

fn header_u64(response: &Response, name: &reqwest::header::HeaderName) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}
