//! Directory Analyzer - 目录分类
//!
//! Classifies every immediate subdirectory of the input root by sampling
//! the first few pages:
//! - any sampled page at least `width_threshold` wide → `Isolated`
//! - any sampled page whose dimensions cannot be read → `Isolated`
//! - otherwise → `GlobalBatch`

use crate::cancel::CancellationToken;
use crate::dimensions;
use crate::error::{ProcessingError, Result};
use crate::types::{DirectoryCategory, DirectoryScanResult, ImageRef};
use shared_utils::batch::{collect_files, list_subdirectories, IMAGE_EXTENSIONS};
use std::path::Path;
use tracing::{debug, info, warn};

pub const SAMPLE_SIZE: usize = 5;

/// A sampled page whose long edge reaches this many pixels marks its
/// directory as high-resolution.
pub const HIGH_RESOLUTION_EDGE: u32 = 4000;

/// Scan `input_root`. Fails only when the root itself cannot be listed;
/// unreadable subdirectories are logged and skipped. On cancellation the
/// results gathered so far are returned.
pub fn analyze(
    input_root: &Path,
    width_threshold: u32,
    cancel: &CancellationToken,
) -> Result<Vec<DirectoryScanResult>> {
    let subdirectories =
        list_subdirectories(input_root).map_err(|source| ProcessingError::DirectoryReadFailed {
            path: input_root.to_path_buf(),
            source,
        })?;

    if subdirectories.is_empty() {
        warn!(root = %input_root.display(), "No subdirectories found");
        return Ok(Vec::new());
    }

    let mut results = Vec::with_capacity(subdirectories.len());

    for directory in subdirectories {
        if cancel.is_cancelled() {
            info!(scanned = results.len(), "Analysis cancelled, returning partial results");
            break;
        }

        let files = match collect_files(&directory, IMAGE_EXTENSIONS) {
            Ok(files) => files,
            Err(source) => {
                let err = ProcessingError::DirectoryReadFailed {
                    path: directory.clone(),
                    source,
                };
                warn!(error = %err, "Skipping directory");
                continue;
            }
        };

        if files.is_empty() {
            warn!(directory = %directory.display(), "No images, skipping");
            continue;
        }

        let images: Vec<ImageRef> = files.into_iter().map(ImageRef::new).collect();
        let Some(sample) = classify_sample(&images, width_threshold, cancel) else {
            info!(scanned = results.len(), "Analysis cancelled, returning partial results");
            break;
        };

        debug!(
            directory = %directory.display(),
            images = images.len(),
            category = %sample.category,
            high_resolution = sample.high_resolution,
            "Directory classified"
        );

        results.push(DirectoryScanResult {
            directory,
            images,
            category: sample.category,
            high_resolution: sample.high_resolution,
        });
    }

    Ok(results)
}

struct SampleVerdict {
    category: DirectoryCategory,
    high_resolution: bool,
}

/// `None` when cancellation interrupted the sampling.
fn classify_sample(
    images: &[ImageRef],
    width_threshold: u32,
    cancel: &CancellationToken,
) -> Option<SampleVerdict> {
    let mut high_resolution = false;

    for image in images.iter().take(SAMPLE_SIZE) {
        if cancel.is_cancelled() {
            return None;
        }

        match dimensions::dimensions(&image.path) {
            Ok(dims) => {
                high_resolution |= dims.long_edge() >= HIGH_RESOLUTION_EDGE;
                if dims.width >= width_threshold {
                    return Some(SampleVerdict {
                        category: DirectoryCategory::Isolated,
                        high_resolution,
                    });
                }
            }
            Err(e) => {
                // unknown ⇒ isolated
                debug!(error = %e, "Sample unreadable, isolating directory");
                return Some(SampleVerdict {
                    category: DirectoryCategory::Isolated,
                    high_resolution,
                });
            }
        }
    }

    Some(SampleVerdict {
        category: DirectoryCategory::GlobalBatch,
        high_resolution,
    })
}

/// Images of every `GlobalBatch` directory, in scan order.
pub fn pool_global_images(results: &[DirectoryScanResult]) -> Vec<ImageRef> {
    results
        .iter()
        .filter(|r| r.category == DirectoryCategory::GlobalBatch)
        .flat_map(|r| r.images.iter().cloned())
        .collect()
}
