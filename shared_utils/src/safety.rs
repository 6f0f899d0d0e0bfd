//! Safety Module
//!
//! Guards the output root before a batch run creates anything in it.

use std::path::{Path, PathBuf};

const DANGEROUS_DIRS: &[&str] = &[
    "/",
    "/System",
    "/usr",
    "/bin",
    "/sbin",
    "/etc",
    "/var",
    "/private",
    "/Library",
    "/Applications",
    "/Users",
    "/home",
    "/root",
    "/boot",
    "/dev",
    "/proc",
    "/sys",
    "/tmp",
    "/opt",
];

/// Refuse system directories and the top of a home directory as write targets.
pub fn check_dangerous_directory(path: &Path) -> Result<(), String> {
    let path_str = path.to_string_lossy();
    let trimmed = if path_str.len() > 1 {
        path_str.trim_end_matches('/')
    } else {
        &path_str
    };

    if let Some(dangerous) = DANGEROUS_DIRS.iter().find(|d| **d == trimmed) {
        return Err(format!(
            "🚨 DANGEROUS OPERATION BLOCKED!\n\
             ❌ Target directory '{}' is a protected system directory.\n\
             💡 Please specify a dedicated output subdirectory instead.",
            dangerous
        ));
    }

    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let components = canonical.components().count();
    let canonical_str = canonical.to_string_lossy();

    if components <= 3
        && (canonical_str.starts_with("/Users/") || canonical_str.starts_with("/home/"))
    {
        return Err(format!(
            "🚨 DANGEROUS OPERATION BLOCKED!\n\
             ❌ Target '{}' is too close to your home directory root.\n\
             💡 Please specify a subdirectory like ~/Comics/converted instead.",
            path.display()
        ));
    }

    Ok(())
}

/// The output root must not live inside the input root, otherwise converted
/// pages are picked up as input by the next scan.
pub fn check_output_outside_input(input: &Path, output: &Path) -> Result<(), String> {
    let input = resolve(input);
    let output = resolve(output);

    if output == input {
        return Err(format!(
            "❌ Output root '{}' is the same as the input root.",
            output.display()
        ));
    }

    if output.starts_with(&input) {
        return Err(format!(
            "❌ Output root '{}' is nested inside the input root '{}'.",
            output.display(),
            input.display()
        ));
    }

    Ok(())
}

/// Canonical form of `path`; a not-yet-created leaf is resolved through
/// its parent.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}
