//! GraphicsMagick discovery and verification.
//!
//! 查找顺序: `COMIC_BATCH_GM`, then the known install paths, then `PATH`
//! augmented with the usual package-manager prefixes.

use crate::error::{ProcessingError, Result};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Explicit executable path; skips the search but is still verified.
pub const GM_ENV: &str = "COMIC_BATCH_GM";

pub const GM_BINARY: &str = "gm";

/// Checked in order before falling back to a PATH search.
pub const KNOWN_PATHS: &[&str] = &[
    "/opt/homebrew/bin/gm",
    "/usr/local/bin/gm",
    "/opt/local/bin/gm",
    "/usr/bin/gm",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GmTool {
    pub path: PathBuf,
    /// First line of `gm -version`.
    pub version: String,
}

/// Locate and verify the tool using the environment of this process.
pub fn discover() -> Result<GmTool> {
    let known: Vec<PathBuf> = KNOWN_PATHS.iter().map(PathBuf::from).collect();
    let path = locate(env::var_os(GM_ENV), &known, env::var_os("PATH"))?;
    verify(&path)
}

pub fn locate(
    override_path: Option<OsString>,
    known_paths: &[PathBuf],
    path_var: Option<OsString>,
) -> Result<PathBuf> {
    if let Some(explicit) = override_path.filter(|p| !p.is_empty()) {
        let explicit = PathBuf::from(explicit);
        debug!(path = %explicit.display(), "Using {} override", GM_ENV);
        return if explicit.is_file() {
            Ok(explicit)
        } else {
            Err(ProcessingError::GraphicsMagickNotFound {
                searched: vec![explicit],
            })
        };
    }

    if let Some(found) = known_paths.iter().find(|p| p.is_file()) {
        debug!(path = %found.display(), "Found GraphicsMagick at known location");
        return Ok(found.clone());
    }

    let search_path = augmented_search_path(known_paths, path_var);
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    which::which_in(GM_BINARY, Some(search_path), cwd).map_err(|e| {
        debug!(error = %e, "PATH search failed");
        ProcessingError::GraphicsMagickNotFound {
            searched: known_paths.to_vec(),
        }
    })
}

/// `PATH` followed by the parent directories of the known locations, which
/// GUI launchers and service managers often leave out.
fn augmented_search_path(known_paths: &[PathBuf], path_var: Option<OsString>) -> OsString {
    let mut dirs: Vec<PathBuf> = path_var
        .as_deref()
        .map(|p| env::split_paths(p).collect())
        .unwrap_or_default();
    for dir in known_paths.iter().filter_map(|p| p.parent()) {
        if !dirs.iter().any(|d| d == dir) {
            dirs.push(dir.to_path_buf());
        }
    }
    env::join_paths(&dirs).unwrap_or_else(|_| path_var.unwrap_or_default())
}

/// Run `<path> -version`; anything but a clean exit fails verification.
pub fn verify(path: &Path) -> Result<GmTool> {
    let failed = |reason: String| ProcessingError::GraphicsMagickVerificationFailed {
        path: path.to_path_buf(),
        reason,
    };

    let output = Command::new(path)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| failed(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = match output.status.code() {
            Some(code) => format!("-version exited with code {}: {}", code, stderr.trim()),
            None => "-version terminated by signal".to_string(),
        };
        return Err(failed(reason));
    }

    let version = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    info!(path = %path.display(), version = %version, "GraphicsMagick verified");

    Ok(GmTool {
        path: path.to_path_buf(),
        version,
    })
}
