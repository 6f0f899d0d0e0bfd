//! Dimension Prober - 只读文件头获取尺寸
//!
//! Reads width/height from the image header only; pixel data is never
//! decoded. Batch probing runs serially for small lists and fans out over
//! rayon chunks otherwise.

use crate::cancel::CancellationToken;
use crate::error::{ProcessingError, Result};
use crate::types::Dimensions;
use image::ImageReader;
use rayon::prelude::*;
use shared_utils::thread_manager;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Below this many paths the thread fan-out costs more than it saves.
pub const SERIAL_PROBE_LIMIT: usize = 20;

pub fn dimensions(path: &Path) -> Result<Dimensions> {
    let unavailable = |reason: String| ProcessingError::ImageDimensionsUnavailable {
        path: path.to_path_buf(),
        reason,
    };

    // content sniffing first: scanned pages are often mislabelled
    let reader = ImageReader::open(path)
        .map_err(|e| unavailable(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| unavailable(e.to_string()))?;

    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| unavailable(e.to_string()))?;

    Ok(Dimensions::new(width, height))
}

/// Probe every path. Missing entries in the returned map are per-image
/// failures; a cancelled probe returns whatever was read so far.
pub fn batch_dimensions(
    paths: &[PathBuf],
    cancel: &CancellationToken,
) -> HashMap<PathBuf, Dimensions> {
    if paths.len() < SERIAL_PROBE_LIMIT {
        return probe_chunk(paths, cancel).into_iter().collect();
    }

    let chunk_len = thread_manager::chunk_len(paths.len());
    debug!(
        paths = paths.len(),
        chunks = paths.len().div_ceil(chunk_len),
        "Probing dimensions in parallel"
    );

    paths
        .par_chunks(chunk_len)
        .map(|chunk| probe_chunk(chunk, cancel))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

fn probe_chunk(paths: &[PathBuf], cancel: &CancellationToken) -> Vec<(PathBuf, Dimensions)> {
    let mut found = Vec::with_capacity(paths.len());
    for path in paths {
        if cancel.is_cancelled() {
            break;
        }
        match dimensions(path) {
            Ok(dims) => found.push((path.clone(), dims)),
            Err(e) => debug!(error = %e, "Dimension probe failed"),
        }
    }
    found
}
