pub mod analyzer;
pub mod auto_tune;
pub mod batch_process;
pub mod cancel;
pub mod command_builder;
pub mod dimensions;
pub mod engine;
pub mod error;
pub mod gm_tool;
pub mod params;
pub mod path_manager;
pub mod pipeline;
pub mod runner;
pub mod scheduler;
pub mod types;

pub use analyzer::{analyze, pool_global_images, HIGH_RESOLUTION_EDGE, SAMPLE_SIZE};
pub use auto_tune::{tune, Tuning};
pub use batch_process::{run_batch, BatchCommand, BatchProcess, ProcessState, WritePolicy};
pub use cancel::CancellationToken;
pub use command_builder::{shell_quote, CommandBuilder};
pub use dimensions::{batch_dimensions, dimensions};
pub use engine::{EngineReport, ProgressFn};
pub use error::{ProcessingError, Result};
pub use gm_tool::{discover, GmTool};
pub use params::{ProcessingParameters, UnsharpMask};
pub use path_manager::{find_duplicate_base_names, DuplicateIndex, PathManager};
pub use pipeline::{CompletionNotifier, LogNotifier, Pipeline, PlannedTask, RunPlan};
pub use runner::{CommandExecutor, ConvertRunner, GmExecutor, RecordingExecutor, TaskRunner};
pub use scheduler::{PriorityScheduler, TaskOrganizer};
pub use types::{
    BatchResult, BatchTask, Dimensions, DirectoryCategory, DirectoryScanResult, ImageRef, Priority,
};

pub use shared_utils::report::RunSummary;
