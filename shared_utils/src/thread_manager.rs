//! Thread Manager
//!
//! CPU budget helpers for the data-parallel parts of the batch tools
//! (header probing). Process-level concurrency is configured separately
//! by the caller.

use std::sync::OnceLock;

/// Overrides the detected core count, e.g. `COMIC_BATCH_THREADS=2`.
pub const THREADS_ENV: &str = "COMIC_BATCH_THREADS";

static AVAILABLE: OnceLock<usize> = OnceLock::new();

/// Logical cores usable by this process (cached, at least 1).
pub fn available_parallelism() -> usize {
    *AVAILABLE.get_or_init(|| {
        std::env::var(THREADS_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or_else(num_cpus::get)
            .max(1)
    })
}

/// Number of chunks to split `item_count` items into for parallel work:
/// never more chunks than items or cores, never zero.
pub fn chunk_count(item_count: usize) -> usize {
    item_count.min(available_parallelism()).max(1)
}

/// Chunk length that yields `chunk_count(item_count)` chunks.
pub fn chunk_len(item_count: usize) -> usize {
    item_count.div_ceil(chunk_count(item_count)).max(1)
}
