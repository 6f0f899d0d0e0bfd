//! Batch Processing Module
//!
//! Directory enumeration used by the batch scanners. Every listing is
//! non-recursive, skips hidden entries and is sorted by file name so the
//! order is stable within (and across) runs.

use crate::common_utils::{has_extension, is_hidden_file};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Page image formats accepted by the comic tools.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];

/// Non-hidden entries directly inside `dir`, sorted by file name, with
/// symlinks resolved.
///
/// Errors reading `dir` itself are returned; unreadable individual entries
/// are logged and skipped.
fn immediate_entries(dir: &Path) -> io::Result<Vec<DirEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        match entry {
            Ok(entry) if !is_hidden_file(entry.path()) => entries.push(entry),
            Ok(_) => {}
            Err(e) if e.depth() == 0 || e.path() == Some(dir) => return Err(e.into()),
            Err(e) => tracing::debug!(error = %e, "Skipping unreadable entry"),
        }
    }

    Ok(entries)
}

/// Regular files directly inside `dir` whose extension is in `extensions`.
pub fn collect_files(dir: &Path, extensions: &[&str]) -> io::Result<Vec<PathBuf>> {
    Ok(immediate_entries(dir)?
        .into_iter()
        .filter(|e| e.file_type().is_file() && has_extension(e.path(), extensions))
        .map(DirEntry::into_path)
        .collect())
}

/// Immediate, non-hidden subdirectories of `root`, sorted by name.
pub fn list_subdirectories(root: &Path) -> io::Result<Vec<PathBuf>> {
    Ok(immediate_entries(root)?
        .into_iter()
        .filter(|e| e.file_type().is_dir())
        .map(DirEntry::into_path)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_collect_files_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["b.PNG", "a.jpg", ".hidden.jpg", "notes.txt", "c.webp"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        fs::create_dir(dir.path().join("nested.jpg")).unwrap();

        let files = collect_files(dir.path(), IMAGE_EXTENSIONS).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "c.webp"]);
    }

    #[test]
    fn test_collect_files_is_not_recursive() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("deep.jpg"), "x").unwrap();

        assert!(collect_files(dir.path(), IMAGE_EXTENSIONS).unwrap().is_empty());
    }

    #[test]
    fn test_collect_files_missing_directory() {
        let dir = TempDir::new().unwrap();
        assert!(collect_files(&dir.path().join("missing"), IMAGE_EXTENSIONS).is_err());
    }

    #[test]
    fn test_list_subdirectories() {
        let dir = TempDir::new().unwrap();
        for name in ["vol2", "vol1", ".git"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("cover.jpg"), "x").unwrap();

        let dirs = list_subdirectories(dir.path()).unwrap();
        assert_eq!(dirs, vec![dir.path().join("vol1"), dir.path().join("vol2")]);
    }

    #[test]
    fn test_list_subdirectories_missing_root() {
        let dir = TempDir::new().unwrap();
        assert!(list_subdirectories(&dir.path().join("nope")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_list_subdirectories_skips_broken_entries() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("vol1")).unwrap();
        fs::create_dir(dir.path().join("target")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("broken")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("target"), dir.path().join("linked")).unwrap();

        let dirs = list_subdirectories(dir.path()).unwrap();
        assert_eq!(
            dirs,
            vec![
                dir.path().join("linked"),
                dir.path().join("target"),
                dir.path().join("vol1"),
            ]
        );
    }
}
