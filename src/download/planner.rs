//! Byte-range planning for chunked downloads.
//!
//! Splits the effective byte range of a resource into contiguous,
//! non-overlapping chunks, one per worker. Small resources and single-thread
//! requests collapse to one chunk: range-request and merge overhead are not
//! worth paying below the threshold.

use super::error::DownloadError;

/// Resources at or below this size are downloaded as a single chunk.
pub const SINGLE_CHUNK_THRESHOLD: u64 = 1_048_576; // 1 MiB

/// One contiguous byte sub-range of the target resource.
///
/// `to` is inclusive; `None` means unbounded (content length unknown).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Zero-based chunk index; merge order.
    pub index: usize,
    /// First byte of the chunk.
    pub from: u64,
    /// Last byte of the chunk, inclusive. `None` for an unbounded tail.
    pub to: Option<u64>,
}

impl ChunkSpan {
    /// Number of bytes this chunk covers, when bounded.
    #[must_use]
    pub fn len(&self) -> Option<u64> {
        self.to.map(|to| to - self.from + 1)
    }

    /// True when the span covers no known bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

/// Splits `[range_from, range_from + effective_length)` into `chunk_count`
/// contiguous chunks.
///
/// Chunks are `floor(effective_length / chunk_count)` bytes each, with the
/// last chunk absorbing the remainder. A `chunk_count` of one, an unknown
/// length, or a length at or below [`SINGLE_CHUNK_THRESHOLD`] yields a
/// single chunk ending at `range_to` (which may be unbounded).
///
/// # Errors
///
/// Returns [`DownloadError::InvalidRange`] when a multi-chunk split is
/// requested for a zero-length range.
pub fn plan_chunks(
    range_from: u64,
    range_to: Option<u64>,
    effective_length: Option<u64>,
    chunk_count: usize,
) -> Result<Vec<ChunkSpan>, DownloadError> {
    let single = |to: Option<u64>| {
        vec![ChunkSpan {
            index: 0,
            from: range_from,
            to,
        }]
    };

    let Some(length) = effective_length else {
        return Ok(single(range_to));
    };

    if length == 0 {
        if chunk_count > 1 {
            return Err(DownloadError::invalid_range(range_from, range_to));
        }
        return Ok(single(range_to));
    }

    if chunk_count <= 1 || length <= SINGLE_CHUNK_THRESHOLD {
        return Ok(single(range_to.or(Some(range_from + length - 1))));
    }

    let range_end = range_to.unwrap_or(range_from + length - 1);
    let chunk_size = length / chunk_count as u64;
    let mut spans = Vec::with_capacity(chunk_count);
    for index in 0..chunk_count {
        let from = range_from + index as u64 * chunk_size;
        let to = if index == chunk_count - 1 {
            range_end
        } else {
            from + chunk_size - 1
        };
        spans.push(ChunkSpan {
            index,
            from,
            to: Some(to),
        });
    }

    Ok(spans)
}
