//! Chunked HTTP download engine.
//!
//! This module downloads a single remote resource by splitting it into byte
//! ranges, fetching the ranges concurrently (each with independent retry and
//! resume), and reassembling the chunks into one output file.
//!
//! # Features
//!
//! - Concurrent byte-range workers over one shared connection pool
//! - Per-chunk retry with resume from the last good offset, with a
//!   restart-from-zero fallback for servers that ignore `Range`
//! - First-failure-wins abort across sibling workers
//! - Disk- or memory-backed chunk sinks, merged in strict index order
//! - Collision-safe output naming (numeric suffixes)
//!
//! # Example
//!
//! ```no_run
//! use splitget_core::download::{DownloadTask, Downloader, HttpTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::new(HttpTransport::new());
//! let task = DownloadTask::new("https://example.com/file.iso", "./file.iso");
//! let outcome = downloader.download(&task).await?;
//! println!("Downloaded to: {}", outcome.final_path.display());
//! # Ok(())
//! # }
//! ```

mod constants;
mod copier;
mod engine;
mod error;
mod events;
mod filename;
mod fsys;
mod merge;
mod planner;
mod sink;
mod task;
mod transport;
mod worker;

pub use constants::{
    DEFAULT_MERGE_UPDATE_INTERVAL, DEFAULT_THREAD_COUNT, DEFAULT_TRY_LIMIT,
    DEFAULT_UPDATE_INTERVAL,
};
pub use copier::{CopyError, DEFAULT_BUFFER_SIZE, copy_stream};
pub use engine::{DownloadOutcome, Downloader};
pub use error::DownloadError;
pub use events::{DownloadObserver, NullObserver};
pub use filename::numbered_path;
pub use planner::{ChunkSpan, SINGLE_CHUNK_THRESHOLD, plan_chunks};
pub use sink::ChunkSink;
pub use task::{ByteRange, DownloadTask};
pub use transport::{HttpTransport, ProbeReport};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
