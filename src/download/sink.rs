//! Chunk sinks: the temporary destinations chunk workers write into.
//!
//! A sink is either a temp file on disk or an in-memory buffer. Each sink is
//! exclusively owned by its worker until the run hands it to the merge
//! engine, which consumes it exactly once and releases the backing storage
//! (file deleted, buffer dropped) as part of consumption.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWrite, AsyncWriteExt, SeekFrom};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::copier::{self, CopyError};
use super::error::DownloadError;

/// Destination a chunk worker appends downloaded bytes to.
#[derive(Debug)]
pub enum ChunkSink {
    /// Temp file on disk.
    File {
        /// Location of the temp file.
        path: PathBuf,
        /// Open write handle.
        file: File,
    },
    /// In-memory buffer.
    Memory {
        /// Growable buffer with a write position.
        cursor: Cursor<Vec<u8>>,
    },
}

impl ChunkSink {
    /// Creates a file-backed sink at `path`, truncating anything there.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] when the file cannot be created.
    pub async fn create_file(path: PathBuf) -> Result<Self, DownloadError> {
        let file = File::create(&path)
            .await
            .map_err(|e| DownloadError::io(path.clone(), e))?;
        Ok(Self::File { path, file })
    }

    /// Creates a memory-backed sink, pre-sized when the chunk length is known.
    #[must_use]
    pub fn memory(expected_len: Option<u64>) -> Self {
        let buf = match expected_len {
            Some(len) => Vec::with_capacity(usize::try_from(len).unwrap_or(0)),
            None => Vec::new(),
        };
        Self::Memory {
            cursor: Cursor::new(buf),
        }
    }

    /// True for file-backed sinks.
    #[must_use]
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File { .. })
    }

    /// Path of the backing temp file, for file-backed sinks.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File { path, .. } => Some(path),
            Self::Memory { .. } => None,
        }
    }

    /// Discards everything written so far and restarts the sink at offset
    /// zero. Used when the server turns out not to honor range requests and
    /// a partial chunk cannot be resumed.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error when truncating the file fails.
    pub async fn reset(&mut self) -> std::io::Result<()> {
        match self {
            Self::File { file, .. } => {
                file.set_len(0).await?;
                file.seek(SeekFrom::Start(0)).await?;
                Ok(())
            }
            Self::Memory { cursor } => {
                cursor.get_mut().clear();
                cursor.set_position(0);
                Ok(())
            }
        }
    }

    /// Streams the sink's content into `writer` and releases the backing
    /// storage: the temp file is deleted (even on failure, so a broken merge
    /// never strands chunk files), the memory buffer is dropped the moment
    /// the copy ends.
    ///
    /// # Errors
    ///
    /// Returns [`CopyError`] when reading the sink back or writing the
    /// destination fails, or when `cancel` fires mid-copy.
    pub async fn consume_into<W, F>(
        self,
        writer: &mut W,
        buffer_size: usize,
        cancel: &CancellationToken,
        interval: Duration,
        on_progress: F,
    ) -> Result<u64, CopyError>
    where
        W: AsyncWrite + Unpin,
        F: FnMut(u64),
    {
        match self {
            Self::File { path, mut file } => {
                if let Err(source) = file.flush().await {
                    remove_file_quiet(&path).await;
                    return Err(CopyError::Io {
                        bytes_copied: 0,
                        source,
                    });
                }
                drop(file);
                let reader = match File::open(&path).await {
                    Ok(reader) => reader,
                    Err(source) => {
                        remove_file_quiet(&path).await;
                        return Err(CopyError::Io {
                            bytes_copied: 0,
                            source,
                        });
                    }
                };
                let result =
                    copier::copy_stream(reader, writer, buffer_size, cancel, interval, on_progress)
                        .await;
                remove_file_quiet(&path).await;
                result
            }
            Self::Memory { mut cursor } => {
                cursor.set_position(0);
                copier::copy_stream(cursor, writer, buffer_size, cancel, interval, on_progress)
                    .await
                // buffer dropped here
            }
        }
    }

    /// Releases the sink without consuming its content: deletes the temp
    /// file, drops the buffer. Used on every failed or canceled exit path.
    pub async fn discard(self) {
        if let Self::File { path, file } = self {
            drop(file);
            remove_file_quiet(&path).await;
        }
    }

    /// Consumes a file-backed sink and returns the temp file path, closing
    /// the write handle. `None` for memory sinks.
    pub async fn into_file_path(self) -> Option<PathBuf> {
        match self {
            Self::File { path, mut file } => {
                let _ = file.flush().await;
                drop(file);
                Some(path)
            }
            Self::Memory { .. } => None,
        }
    }
}

impl AsyncWrite for ChunkSink {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            ChunkSink::File { file, .. } => Pin::new(file).poll_write(cx, buf),
            ChunkSink::Memory { cursor } => Pin::new(cursor).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ChunkSink::File { file, .. } => Pin::new(file).poll_flush(cx),
            ChunkSink::Memory { cursor } => Pin::new(cursor).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ChunkSink::File { file, .. } => Pin::new(file).poll_shutdown(cx),
            ChunkSink::Memory { cursor } => Pin::new(cursor).poll_shutdown(cx),
        }
    }
}

async fn remove_file_quiet(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove chunk file");
    }
}
