//! Auto Parameter Calculator
//!
//! Derives worker count and batch size from the total image count when
//! the caller asks for automatic tuning (`workers == 0`).

/// Worker ceiling in auto mode.
pub const MAX_AUTO_WORKERS: usize = 6;
pub const MAX_BATCH_SIZE: usize = 1000;

/// Sentinel worker count selecting auto mode.
pub const AUTO_WORKERS: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    pub workers: usize,
    pub batch_size: usize,
}

/// Explicit worker counts pass through untouched together with the
/// caller's batch size.
pub fn tune(requested_workers: usize, requested_batch_size: usize, total_images: usize) -> Tuning {
    if requested_workers != AUTO_WORKERS {
        return Tuning {
            workers: requested_workers,
            batch_size: requested_batch_size,
        };
    }

    let workers = auto_workers(total_images);
    Tuning {
        workers,
        batch_size: total_images.div_ceil(workers).clamp(1, MAX_BATCH_SIZE),
    }
}

fn auto_workers(total_images: usize) -> usize {
    match total_images {
        0..=9 => 1,
        10..=49 => (1 + (total_images - 10).div_ceil(20)).min(3),
        50..=299 => (3 + (total_images - 50).div_ceil(50)).min(MAX_AUTO_WORKERS),
        _ => MAX_AUTO_WORKERS,
    }
}
