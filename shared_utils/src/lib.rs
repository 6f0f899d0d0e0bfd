//! Shared Utilities for the comic_batch tools
//!
//! - Logging setup (`tracing` + rolling file appender)
//! - Output-root safety checks
//! - Non-recursive, stable directory enumeration
//! - Progress bars and end-of-run summary reports
//! - CPU budget helpers

pub mod batch;
pub mod common_utils;
pub mod logging;
pub mod progress;
pub mod report;
pub mod safety;
pub mod thread_manager;

pub use batch::{collect_files, list_subdirectories, IMAGE_EXTENSIONS};
pub use common_utils::{file_stem_lossy, get_extension_lowercase, has_extension, is_hidden_file};
pub use progress::{create_progress_bar, format_duration};
pub use report::{print_summary_json, print_summary_report, RunSummary, FAILED_SAMPLE_LIMIT};
pub use safety::{check_dangerous_directory, check_output_outside_input};
