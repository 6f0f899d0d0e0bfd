use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// One source page. Created during enumeration, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImageRef {
    pub path: PathBuf,
    /// Name of the source subdirectory (the chapter/volume folder).
    pub directory_name: String,
    /// Lower-cased extension without the dot.
    pub extension: String,
}

impl ImageRef {
    pub fn new(path: PathBuf) -> Self {
        let directory_name = path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = shared_utils::get_extension_lowercase(&path);
        Self {
            path,
            directory_name,
            extension,
        }
    }

    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }

    pub fn base_name(&self) -> String {
        shared_utils::common_utils::file_stem_lossy(&self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn long_edge(&self) -> u32 {
        self.width.max(self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DirectoryCategory {
    /// Narrow pages only: merged into the pooled global batch.
    GlobalBatch,
    /// Wide (split) pages or undeterminable samples: processed per directory.
    Isolated,
}

impl fmt::Display for DirectoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryCategory::GlobalBatch => write!(f, "global"),
            DirectoryCategory::Isolated => write!(f, "isolated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectoryScanResult {
    pub directory: PathBuf,
    pub images: Vec<ImageRef>,
    pub category: DirectoryCategory,
    pub high_resolution: bool,
}

impl DirectoryScanResult {
    pub fn name(&self) -> String {
        self.directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// One unit of work: a contiguous slice of one directory or of the global pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchTask {
    pub id: usize,
    pub images: Vec<ImageRef>,
    pub output_dir: PathBuf,
    pub batch_size: usize,
    pub is_global: bool,
    pub high_resolution: bool,
    pub priority: Priority,
    /// Relative cost, only meaningful for ordering.
    pub estimated_cost: u64,
}

/// Outcome of one task. `cancelled` tasks count neither processed nor failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    pub processed: usize,
    pub failed: Vec<PathBuf>,
    pub is_global: bool,
    pub cancelled: bool,
}

impl BatchResult {
    pub fn cancelled(is_global: bool) -> Self {
        Self {
            is_global,
            cancelled: true,
            ..Default::default()
        }
    }

    /// Every image of `task` failed.
    pub fn failed(task: &BatchTask) -> Self {
        Self {
            processed: 0,
            failed: task.images.iter().map(|i| i.path.clone()).collect(),
            is_global: task.is_global,
            cancelled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ref_fields() {
        let image = ImageRef::new(PathBuf::from("/comics/Vol 01/Page.JPG"));
        assert_eq!(image.directory_name, "Vol 01");
        assert_eq!(image.extension, "jpg");
        assert_eq!(image.base_name(), "Page");
        assert_eq!(image.directory(), Path::new("/comics/Vol 01"));
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }
}
