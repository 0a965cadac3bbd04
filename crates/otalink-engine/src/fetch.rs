//! Chunked fetch scheduling.
//!
//! The scheduler decides the next byte range to request and bounds
//! retries. Offsets are always re-requested from the current
//! `bytes_written`, so a duplicate or failed response can never
//! double-apply: acceptance is the only thing that advances the
//! offset.

use crate::error::TransferError;

/// Smallest chunk length the transport is asked for.
pub const MIN_FETCH: usize = 512;
/// Largest chunk length the transport is asked for (matches the
/// agent's download buffer).
pub const MAX_FETCH: usize = 4096;

/// Default bound on consecutive no-progress range requests.
pub const DEFAULT_CHUNK_RETRIES: u8 = 5;

/// Mutable transfer bookkeeping, owned exclusively by the update state
/// machine for one attempt.
#[derive(Debug, Default)]
pub struct TransferProgress {
    /// Image-stream bytes accepted so far. Monotonic non-decreasing
    /// while the transfer is healthy.
    pub bytes_written: u32,
    /// Offset seen by the previous `next_range` call, for stall
    /// detection. `None` until the first call of an attempt.
    pub previous_offset: Option<u32>,
    /// End-of-image padding discovered by the decrypt pipeline
    /// (0 until the final chunk is identified).
    pub padding_trim: u32,
    pub chunk_retry_count: u8,
    pub notify_retry_count: u8,
    /// Remote fetches only: set once the redirect/metadata body has
    /// been resolved into the real image endpoint.
    pub url_resolved: bool,
}

impl TransferProgress {
    pub fn reset(&mut self) {
        *self = TransferProgress::default();
    }
}

/// Decides the next byte range to fetch and enforces the
/// resumption-abort contract.
#[derive(Debug, Clone, Copy)]
pub struct ChunkScheduler {
    chunk_len: u32,
    retry_limit: u8,
}

impl ChunkScheduler {
    /// `chunk_len` is clamped to `[MIN_FETCH, MAX_FETCH]`.
    pub fn new(chunk_len: u32, retry_limit: u8) -> Self {
        let chunk_len = chunk_len.clamp(MIN_FETCH as u32, MAX_FETCH as u32);
        Self {
            chunk_len,
            retry_limit,
        }
    }

    /// Next `(offset, count)` to request, `None` when the image is
    /// fully fetched, or `GetFailed` once the retry bound is exceeded
    /// with no forward progress. `GetFailed` is fatal for the attempt,
    /// not retryable.
    pub fn next_range(
        &self,
        progress: &mut TransferProgress,
        total_length: u32,
    ) -> Result<Option<(u32, u32)>, TransferError> {
        let fetched = progress.bytes_written + progress.padding_trim;
        let count = (self.chunk_len - 1).min(total_length.saturating_sub(fetched));
        if count == 0 {
            return Ok(None);
        }

        let offset = progress.bytes_written;
        if progress.previous_offset == Some(offset) {
            progress.chunk_retry_count += 1;
            if progress.chunk_retry_count > self.retry_limit {
                return Err(TransferError::GetFailed);
            }
        } else {
            progress.chunk_retry_count = 0;
            progress.previous_offset = Some(offset);
        }

        Ok(Some((offset, count)))
    }
}
