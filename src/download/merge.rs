//! Chunk merge engine: concatenates ordered chunk sinks into the final file.
//!
//! The merge assembles everything under a temporary, collision-numbered name
//! in the merge directory and only renames to the final destination once the
//! last chunk landed, so a failed or canceled merge never leaves a partial
//! artifact behind as the "final" file. Ascending chunk-index order is the
//! correctness invariant: byte `k` of the output equals byte `k` of the
//! resource only because the planner's spans are contiguous and gap-free.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tracing::{debug, instrument, warn};

use super::copier::CopyError;
use super::error::DownloadError;
use super::events::DownloadObserver;
use super::filename::numbered_path;
use super::fsys::rename_or_copy;
use super::sink::ChunkSink;
use super::worker::RunSignals;

/// Where and how to assemble the final artifact.
#[derive(Debug)]
pub(crate) struct MergePlan<'a> {
    /// Requested output path (absolute).
    pub output_path: &'a Path,
    /// Directory the temp merge file is created in.
    pub merge_dir: &'a Path,
    /// Leave the final artifact in the merge directory.
    pub keep_in_merge_dir: bool,
    pub buffer_size: usize,
    pub update_interval: Duration,
}

/// Appends `sinks` in index order into one file and moves it into place.
///
/// Consumed sinks release their backing storage immediately; on any failure
/// or cancellation the temp output and every unconsumed sink are destroyed.
///
/// Returns the final path, which may carry a numbered suffix when the
/// requested name was taken (resolved at the last possible moment).
#[instrument(level = "debug", skip_all, fields(chunks = sinks.len()))]
pub(crate) async fn merge_chunks(
    sinks: Vec<ChunkSink>,
    plan: &MergePlan<'_>,
    signals: &RunSignals,
    observer: &dyn DownloadObserver,
) -> Result<PathBuf, DownloadError> {
    let file_name = plan
        .output_path
        .file_name()
        .ok_or(DownloadError::NoOutputFile)?
        .to_os_string();

    let temp_path = numbered_path(&plan.merge_dir.join(format!(
        "{}.tmp",
        file_name.to_string_lossy()
    )));

    let mut output = match File::create(&temp_path).await {
        Ok(file) => file,
        Err(source) => {
            discard_all(sinks).await;
            return Err(DownloadError::CreateFile {
                path: temp_path,
                source,
            });
        }
    };

    let chunk_count = sinks.len();
    let mut remaining = sinks.into_iter();
    let mut index = 0;
    while let Some(sink) = remaining.next() {
        if signals.cancel.is_cancelled() {
            sink.discard().await;
            abandon(output, &temp_path, remaining).await;
            return Err(signals.cancel_error());
        }

        let copied = sink
            .consume_into(
                &mut output,
                plan.buffer_size,
                &signals.cancel,
                plan.update_interval,
                |n| observer.on_merge_progress(index, chunk_count, n),
            )
            .await;

        match copied {
            Ok(bytes) => {
                debug!(chunk = index, bytes, "chunk merged");
                observer.on_merge_progress(index, chunk_count, bytes);
            }
            Err(CopyError::Canceled { .. }) => {
                abandon(output, &temp_path, remaining).await;
                return Err(signals.cancel_error());
            }
            Err(CopyError::Io { source, .. }) => {
                abandon(output, &temp_path, remaining).await;
                return Err(DownloadError::MergeFailed {
                    path: temp_path,
                    source,
                });
            }
        }
        index += 1;
    }
    drop(output);

    // Collision numbering happens only now, so two runs racing for the same
    // nominal name cannot overwrite each other's finished artifact.
    let dest_dir = if plan.keep_in_merge_dir {
        plan.merge_dir.to_path_buf()
    } else {
        plan.output_path
            .parent()
            .map_or_else(|| plan.merge_dir.to_path_buf(), Path::to_path_buf)
    };
    let final_path = numbered_path(&dest_dir.join(&file_name));

    if let Err(source) = rename_or_copy(&temp_path, &final_path).await {
        remove_quiet(&temp_path).await;
        return Err(DownloadError::MergeFailed {
            path: final_path,
            source,
        });
    }

    Ok(final_path)
}

/// Destroys the temp output and every unconsumed sink.
async fn abandon(
    output: File,
    temp_path: &Path,
    remaining: impl Iterator<Item = ChunkSink>,
) {
    drop(output);
    remove_quiet(temp_path).await;
    for sink in remaining {
        sink.discard().await;
    }
}

pub(crate) async fn discard_all(sinks: impl IntoIterator<Item = ChunkSink>) {
    for sink in sinks {
        sink.discard().await;
    }
}

async fn remove_quiet(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove merge temp file");
    }
}
