use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("GraphicsMagick not found (searched: {})", format_searched(.searched))]
    GraphicsMagickNotFound { searched: Vec<PathBuf> },

    #[error("GraphicsMagick at {path} failed verification: {reason}")]
    GraphicsMagickVerificationFailed { path: PathBuf, reason: String },

    #[error("GraphicsMagick exited with code {exit_code}: {}", stderr_excerpt(.stderr))]
    GraphicsMagickExecutionFailed { exit_code: i32, stderr: String },

    #[error("Failed to launch {program}: {source}")]
    SpawnFailed {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read directory {path}: {source}")]
    DirectoryReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    DirectoryCreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot read dimensions of {path}: {reason}")]
    ImageDimensionsUnavailable { path: PathBuf, reason: String },

    #[error("Pipe write failed ({kind:?}): {message}")]
    PipeWriteFailed { kind: io::ErrorKind, message: String },

    #[error("Pipe to GraphicsMagick is broken")]
    PipeBroken,

    #[error("Pipe write made no progress after {attempts} attempts")]
    ProcessIoTimeout { attempts: u32 },

    #[error("Path is not valid UTF-8: {0}")]
    EncodingFailed(PathBuf),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No images found in {0}")]
    NoImagesFound(PathBuf),

    #[error("Processing cancelled")]
    ProcessingCancelled,
}

pub type Result<T> = std::result::Result<T, ProcessingError>;

impl ProcessingError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessingError::ProcessingCancelled)
    }

    /// Classify an `io::Error` raised while writing into the command pipe.
    pub fn from_pipe_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe => ProcessingError::PipeBroken,
            kind => ProcessingError::PipeWriteFailed {
                kind,
                message: err.to_string(),
            },
        }
    }
}

fn format_searched(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "PATH".to_string();
    }
    let mut names: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    names.push("PATH".to_string());
    names.join(", ")
}

/// Last non-empty stderr line; the full text stays in the variant.
fn stderr_excerpt(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no error output")
        .to_string()
}
