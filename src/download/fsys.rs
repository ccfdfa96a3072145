//! Small filesystem wrappers used by the orchestrator and merge engine.

use std::path::Path;

use tracing::debug;

/// Checks that the filesystem volume backing `path` is reachable.
///
/// Walks up to the nearest existing ancestor and asks the filesystem for its
/// metadata. A detached mount or an unready removable drive fails the
/// metadata call; a path with no existing ancestor at all is also not ready.
#[must_use]
pub fn volume_ready(path: &Path) -> bool {
    let mut current = Some(path);
    while let Some(candidate) = current {
        match std::fs::metadata(candidate) {
            Ok(_) => return true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                current = candidate.parent();
            }
            Err(e) => {
                debug!(path = %candidate.display(), error = %e, "volume readiness probe failed");
                return false;
            }
        }
    }
    false
}

/// Moves `from` to `to`, falling back to copy-and-delete when the rename
/// crosses filesystems (the merge directory and the output directory are
/// allowed to live on different volumes).
///
/// # Errors
///
/// Returns the underlying IO error when both the rename and the copy fail.
pub async fn rename_or_copy(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(
                from = %from.display(),
                to = %to.display(),
                error = %rename_err,
                "rename failed, falling back to copy"
            );
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await?;
            Ok(())
        }
    }
}
