//! CLI entry point for the splitget tool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use splitget_core::download::{
    ByteRange, DownloadError, DownloadObserver, DownloadTask, Downloader, HttpTransport,
};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (warn)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(filename_from_url(&args.url)));

    let mut task = DownloadTask::new(&args.url, output);
    task.temp_dir = args.temp_dir.clone();
    task.merge_dir = args.merge_dir.clone();
    task.thread_count = usize::from(args.threads);
    task.try_limit = args.tries;
    task.use_memory_sinks = args.memory;
    task.keep_in_merge_dir = args.keep;
    task.update_interval = Duration::from_millis(args.update_interval);
    task.headers = parse_headers(&args.headers)?;

    if let Some(spec) = &args.range {
        task.range = Some(
            ByteRange::parse_header_value(spec)
                .with_context(|| format!("invalid --range value: {spec}"))?,
        );
    }

    let observer: Arc<dyn DownloadObserver> = if args.quiet {
        Arc::new(splitget_core::NullObserver)
    } else {
        Arc::new(ProgressObserver::new())
    };
    let downloader = Arc::new(Downloader::with_observer(HttpTransport::new(), observer));

    // Ctrl-C is the caller-initiated stop: workers wind down, sinks are
    // destroyed, and the run reports a clean cancellation.
    let stopper = Arc::clone(&downloader);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    match downloader.download(&task).await {
        Ok(outcome) => {
            info!(
                path = %outcome.final_path.display(),
                bytes = outcome.bytes_transferred,
                "download complete"
            );
            println!("{}", outcome.final_path.display());
            Ok(())
        }
        Err(DownloadError::Canceled) => {
            info!("download canceled");
            eprintln!("canceled");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Builds a header map from repeated `-H "Name: Value"` arguments.
fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for entry in raw {
        let Some((name, value)) = entry.split_once(':') else {
            bail!("invalid header (expected \"Name: Value\"): {entry}");
        };
        let name: HeaderName = name
            .trim()
            .parse()
            .with_context(|| format!("invalid header name in: {entry}"))?;
        let value: HeaderValue = value
            .trim()
            .parse()
            .with_context(|| format!("invalid header value in: {entry}"))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Derives an output file name from the URL's last path segment.
fn filename_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "download.bin".to_string())
}

/// Progress bar rendering for download and merge phases.
struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    fn new() -> Self {
        let bar = ProgressBar::hidden();
        bar.set_style(
            ProgressStyle::with_template(
                "{msg} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }
}

impl DownloadObserver for ProgressObserver {
    fn on_connecting(&self, url: &str) {
        debug!(url, "connecting");
    }

    fn on_download_started(&self, total_bytes: Option<u64>) {
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        match total_bytes {
            Some(total) => self.bar.set_length(total),
            None => {
                self.bar.set_style(
                    ProgressStyle::with_template("{msg} {bytes} ({bytes_per_sec})")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
            }
        }
        self.bar.set_message("downloading");
    }

    fn on_download_progress(&self, bytes_transferred: u64) {
        self.bar.set_position(bytes_transferred);
    }

    fn on_merge_started(&self, chunk_count: usize) {
        self.bar.set_message(format!("merging {chunk_count} chunks"));
    }

    fn on_download_finished(
        &self,
        _bytes_transferred: u64,
        error: Option<&DownloadError>,
        _final_path: Option<&std::path::Path>,
    ) {
        self.bar.finish_and_clear();
        if let Some(e) = error
            && !matches!(e, DownloadError::Canceled)
        {
            warn!(error = %e, "download failed");
        }
    }
}
