//! Per-task glue: probe → build commands → execute.

use crate::batch_process::{run_batch, BatchCommand, WritePolicy};
use crate::cancel::CancellationToken;
use crate::command_builder::CommandBuilder;
use crate::dimensions;
use crate::error::{ProcessingError, Result};
use crate::params::ProcessingParameters;
use crate::path_manager::{DuplicateIndex, PathManager};
use crate::types::{BatchResult, BatchTask};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, warn};

/// Executes one task. Never fails: errors become failed files, and a
/// cancelled task reports `BatchResult::cancelled`.
pub trait TaskRunner: Send + Sync {
    fn run_task(&self, task: &BatchTask, cancel: &CancellationToken) -> BatchResult;
}

/// Runs one batch of command lines to completion.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, commands: &[String], cancel: &CancellationToken) -> Result<()>;
}

/// One `gm batch` child per call.
#[derive(Debug, Clone)]
pub struct GmExecutor {
    command: BatchCommand,
    policy: WritePolicy,
}

impl GmExecutor {
    pub fn new(gm: &Path) -> Self {
        Self::with_command(BatchCommand::graphicsmagick(gm))
    }

    pub fn with_command(command: BatchCommand) -> Self {
        Self {
            command,
            policy: WritePolicy::default(),
        }
    }

}

impl CommandExecutor for GmExecutor {
    fn execute(&self, commands: &[String], cancel: &CancellationToken) -> Result<()> {
        run_batch(&self.command, commands, self.policy, cancel).map(|_| ())
    }
}

/// Keeps every batch instead of running it; one entry per `execute` call.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    batches: Mutex<Vec<Vec<String>>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl CommandExecutor for RecordingExecutor {
    fn execute(&self, commands: &[String], cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(commands.to_vec());
        Ok(())
    }
}

/// Commands for one task plus the images they cover.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedBatch {
    pub commands: Vec<String>,
    /// Images with at least one command, in task order.
    pub included: Vec<PathBuf>,
    /// Images that could not be probed or named.
    pub failed: Vec<PathBuf>,
}

/// Probe every image of `task` and build its commands. `None` when
/// cancelled mid-probe.
pub fn prepare_batch(
    task: &BatchTask,
    builder: &CommandBuilder<'_>,
    cancel: &CancellationToken,
) -> Option<PreparedBatch> {
    let paths: Vec<PathBuf> = task.images.iter().map(|i| i.path.clone()).collect();
    let dims = dimensions::batch_dimensions(&paths, cancel);
    if cancel.is_cancelled() {
        return None;
    }

    let mut prepared = PreparedBatch::default();
    for image in &task.images {
        let Some(&d) = dims.get(&image.path) else {
            warn!(image = %image.path.display(), "Dimensions unavailable, skipping");
            prepared.failed.push(image.path.clone());
            continue;
        };

        match builder.build(image, d, &task.output_dir) {
            Ok(commands) => {
                prepared.commands.extend(commands);
                prepared.included.push(image.path.clone());
            }
            Err(e) => {
                warn!(error = %e, "Cannot build command");
                prepared.failed.push(image.path.clone());
            }
        }
    }
    Some(prepared)
}

/// Production `TaskRunner`: output names are unique across every task of
/// the run through the shared `PathManager`.
pub struct ConvertRunner<E: CommandExecutor> {
    params: ProcessingParameters,
    paths: PathManager,
    duplicates: DuplicateIndex,
    executor: E,
}

impl<E: CommandExecutor> ConvertRunner<E> {
    pub fn new(params: ProcessingParameters, duplicates: DuplicateIndex, executor: E) -> Self {
        Self {
            params,
            paths: PathManager::new(),
            duplicates,
            executor,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }
}

impl<E: CommandExecutor> TaskRunner for ConvertRunner<E> {
    fn run_task(&self, task: &BatchTask, cancel: &CancellationToken) -> BatchResult {
        if cancel.is_cancelled() {
            return BatchResult::cancelled(task.is_global);
        }

        if let Err(source) = std::fs::create_dir_all(&task.output_dir) {
            let err = ProcessingError::DirectoryCreateFailed {
                path: task.output_dir.clone(),
                source,
            };
            error!(task = task.id, error = %err, "Task failed");
            return BatchResult::failed(task);
        }

        let builder = CommandBuilder::new(&self.params, &self.paths, &self.duplicates);
        let Some(prepared) = prepare_batch(task, &builder, cancel) else {
            return BatchResult::cancelled(task.is_global);
        };

        let mut result = BatchResult {
            processed: 0,
            failed: prepared.failed,
            is_global: task.is_global,
            cancelled: false,
        };
        if prepared.commands.is_empty() {
            return result;
        }

        debug!(
            task = task.id,
            images = prepared.included.len(),
            commands = prepared.commands.len(),
            "Executing batch"
        );

        match self.executor.execute(&prepared.commands, cancel) {
            Ok(()) => result.processed = prepared.included.len(),
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                return BatchResult::cancelled(task.is_global)
            }
            Err(e) => {
                error!(
                    task = task.id,
                    images = prepared.included.len(),
                    error = %e,
                    "Batch failed"
                );
                result.failed.extend(prepared.included);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::test_images::{write_garbage, write_image};
    use crate::types::{ImageRef, Priority};
    use tempfile::TempDir;

    struct FailingExecutor;

    impl CommandExecutor for FailingExecutor {
        fn execute(&self, _commands: &[String], _cancel: &CancellationToken) -> Result<()> {
            Err(ProcessingError::PipeBroken)
        }
    }

    fn task(images: Vec<PathBuf>, output_dir: PathBuf) -> BatchTask {
        BatchTask {
            id: 0,
            batch_size: images.len(),
            images: images.into_iter().map(ImageRef::new).collect(),
            output_dir,
            is_global: true,
            high_resolution: false,
            priority: Priority::Normal,
            estimated_cost: 1,
        }
    }

    #[test]
    fn test_successful_task() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let a = write_image(input.path(), "a.png", 800, 4);
        let b = write_image(input.path(), "b.png", 1800, 4);
        let out_dir = output.path().join("ch");

        let runner = ConvertRunner::new(
            ProcessingParameters::default(),
            DuplicateIndex::default(),
            RecordingExecutor::new(),
        );
        let result = runner.run_task(&task(vec![a, b], out_dir.clone()), &CancellationToken::new());

        assert_eq!(result.processed, 2);
        assert!(result.failed.is_empty());
        assert!(out_dir.is_dir());

        let batches = runner.executor().batches();
        assert_eq!(batches.len(), 1);
        // one plain page plus a split pair
        assert_eq!(batches[0].len(), 3);
        assert!(batches[0][1].contains("-crop 900x4+900+0"));
    }

    #[test]
    fn test_unprobeable_images_fail_individually() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let good = write_image(input.path(), "good.png", 800, 4);
        let bad = write_garbage(input.path(), "bad.png");

        let runner = ConvertRunner::new(
            ProcessingParameters::default(),
            DuplicateIndex::default(),
            RecordingExecutor::new(),
        );
        let result = runner.run_task(
            &task(vec![good, bad.clone()], output.path().to_path_buf()),
            &CancellationToken::new(),
        );
        assert_eq!(result.processed, 1);
        assert_eq!(result.failed, vec![bad]);
    }

    #[test]
    fn test_executor_failure_fails_whole_batch() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let paths = vec![
            write_image(input.path(), "1.png", 10, 4),
            write_image(input.path(), "2.png", 10, 4),
        ];

        let runner = ConvertRunner::new(
            ProcessingParameters::default(),
            DuplicateIndex::default(),
            FailingExecutor,
        );
        let result = runner.run_task(
            &task(paths.clone(), output.path().to_path_buf()),
            &CancellationToken::new(),
        );
        assert_eq!(result.processed, 0);
        assert_eq!(result.failed, paths);
    }

    #[test]
    fn test_uncreatable_output_dir_fails_task() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let blocker = output.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let image = write_image(input.path(), "1.png", 10, 4);

        let runner = ConvertRunner::new(
            ProcessingParameters::default(),
            DuplicateIndex::default(),
            RecordingExecutor::new(),
        );
        let result = runner.run_task(
            &task(vec![image.clone()], blocker.join("sub")),
            &CancellationToken::new(),
        );
        assert_eq!(result.failed, vec![image]);
        assert!(runner.executor().batches().is_empty());
    }

    #[test]
    fn test_cancelled_task_reports_nothing() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let image = write_image(input.path(), "1.png", 10, 4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let runner = ConvertRunner::new(
            ProcessingParameters::default(),
            DuplicateIndex::default(),
            RecordingExecutor::new(),
        );
        let result = runner.run_task(&task(vec![image], output.path().to_path_buf()), &cancel);
        assert!(result.cancelled);
        assert_eq!(result.processed, 0);
        assert!(result.failed.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_gm_executor_streams_to_child() {
        let dir = TempDir::new().unwrap();
        let record = dir.path().join("stdin.txt");
        let script = format!("cat > '{}'", record.display());
        let executor =
            GmExecutor::with_command(BatchCommand::new("/bin/sh").args(["-c".to_string(), script]));

        executor
            .execute(&["convert 'a' 'b'".to_string()], &CancellationToken::new())
            .unwrap();
        assert_eq!(std::fs::read_to_string(record).unwrap(), "convert 'a' 'b'\n");
    }
}
