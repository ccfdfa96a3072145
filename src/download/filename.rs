//! Collision-safe output naming.
//!
//! When the requested path already exists, a numeric suffix is inserted
//! before the extension (`report_2.txt`, `report_3.txt`, ...) and probed
//! upward until an unused name is found. Deterministic per invocation; it
//! does not guard against concurrent external processes, only against
//! repeated calls within one run.

use std::path::{Path, PathBuf};

/// First numeric suffix tried for duplicates.
const SUFFIX_START: usize = 2;

/// Resolves `path` to a name that does not exist yet.
///
/// Returns `path` unchanged when it is free; otherwise `name_2.ext`,
/// `name_3.ext`, and so on.
#[must_use]
pub fn numbered_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    // Split on the last dot so "archive.tar.gz" numbers as "archive.tar_2.gz",
    // matching how the stem/extension split behaves elsewhere in the tool.
    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename.as_str(), ""),
    };

    for i in SUFFIX_START..10_000 {
        let candidate = dir.join(format!("{stem}_{i}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }

    // Fallback (extremely unlikely)
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{timestamp}{ext}"))
}
