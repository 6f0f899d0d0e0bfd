//! Output naming: duplicate base-name detection and run-wide path
//! reservation.

use crate::types::{DirectoryScanResult, ImageRef};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Lower-cased base names shared by more than one image of the list,
/// e.g. `page.jpg` + `page.PNG` → `{"page"}`.
pub fn find_duplicate_base_names(images: &[ImageRef]) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut duplicates = HashSet::new();
    for image in images {
        let key = image.base_name().to_lowercase();
        if !seen.insert(key.clone()) {
            duplicates.insert(key);
        }
    }
    duplicates
}

/// Duplicate base names per source directory, computed once over each
/// directory's full image list.
#[derive(Debug, Default, Clone)]
pub struct DuplicateIndex {
    by_directory: HashMap<PathBuf, HashSet<String>>,
}

impl DuplicateIndex {
    pub fn from_scans(scans: &[DirectoryScanResult]) -> Self {
        let by_directory = scans
            .iter()
            .filter_map(|scan| {
                let duplicates = find_duplicate_base_names(&scan.images);
                if duplicates.is_empty() {
                    None
                } else {
                    debug!(
                        directory = %scan.directory.display(),
                        names = ?duplicates,
                        "Duplicate base names, appending source extension"
                    );
                    Some((scan.directory.clone(), duplicates))
                }
            })
            .collect();
        Self { by_directory }
    }

    pub fn is_duplicate(&self, image: &ImageRef) -> bool {
        self.by_directory
            .get(image.directory())
            .is_some_and(|names| names.contains(&image.base_name().to_lowercase()))
    }

    /// Base name for outputs of `image`: `page` normally, `page_png` when
    /// another image in the same directory is also called `page`.
    pub fn output_base_name(&self, image: &ImageRef) -> String {
        let base = image.base_name();
        if self.is_duplicate(image) {
            format!("{}_{}", base, image.extension)
        } else {
            base
        }
    }
}

/// Guarantees that no two outputs of one run share a path. Names are
/// compared case-insensitively within an output directory; collisions get
/// `_1`, `_2`, ... appended to the stem.
#[derive(Debug, Default)]
pub struct PathManager {
    reserved: Mutex<HashMap<PathBuf, HashSet<String>>>,
}

impl PathManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `stem + suffix` for every suffix under one shared stem, so a
    /// split page keeps its `-1`/`-2` pair together.
    pub fn reserve(&self, dir: &Path, stem: &str, suffixes: &[&str]) -> Vec<PathBuf> {
        let mut reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        let taken = reserved.entry(dir.to_path_buf()).or_default();

        let mut counter = 0usize;
        loop {
            let candidate = if counter == 0 {
                stem.to_string()
            } else {
                format!("{}_{}", stem, counter)
            };
            let names: Vec<String> = suffixes
                .iter()
                .map(|suffix| format!("{}{}", candidate, suffix))
                .collect();

            if names.iter().all(|n| !taken.contains(&n.to_lowercase())) {
                if counter > 0 {
                    debug!(
                        dir = %dir.display(),
                        stem,
                        renamed = %candidate,
                        "Output name collision"
                    );
                }
                for name in &names {
                    taken.insert(name.to_lowercase());
                }
                return names.into_iter().map(|n| dir.join(n)).collect();
            }
            counter += 1;
        }
    }
}
