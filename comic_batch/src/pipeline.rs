//! End-to-end run: validate → locate tool → analyze → tune → organize →
//! execute → summarize.
//!
//! Structural failures (bad parameters, unsafe output root, missing tool,
//! unreadable input, uncreatable output) abort before any task starts.
//! Every run, aborted or not, yields a `RunSummary` and exactly one
//! completion notification.

use crate::analyzer;
use crate::auto_tune::{self, Tuning};
use crate::cancel::CancellationToken;
use crate::command_builder::CommandBuilder;
use crate::engine::{self, ProgressFn};
use crate::error::{ProcessingError, Result};
use crate::gm_tool;
use crate::params::ProcessingParameters;
use crate::path_manager::{DuplicateIndex, PathManager};
use crate::runner::{prepare_batch, CommandExecutor, ConvertRunner, GmExecutor, PreparedBatch};
use crate::scheduler::TaskOrganizer;
use crate::types::{BatchTask, DirectoryScanResult};
use serde::Serialize;
use shared_utils::report::RunSummary;
use shared_utils::safety;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Called once at the end of every run.
pub trait CompletionNotifier: Send + Sync {
    fn notify(&self, processed: usize, failed: usize, duration: Duration);
}

/// Default notifier: one `info` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl CompletionNotifier for LogNotifier {
    fn notify(&self, processed: usize, failed: usize, duration: Duration) {
        info!(
            processed,
            failed,
            duration_secs = duration.as_secs_f64(),
            "Batch conversion finished"
        );
    }
}

/// Analysis, tuning and task list of a run, without execution.
#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    pub scans: Vec<DirectoryScanResult>,
    pub total_images: usize,
    pub workers: usize,
    pub batch_size: usize,
    pub tasks: Vec<BatchTask>,
}

/// A planned task with the commands it would stream.
#[derive(Debug, Clone)]
pub struct PlannedTask {
    pub task: BatchTask,
    pub batch: PreparedBatch,
}

pub struct Pipeline {
    input_root: PathBuf,
    output_root: PathBuf,
    params: ProcessingParameters,
    notifier: Box<dyn CompletionNotifier>,
    progress: Option<Box<ProgressFn>>,
}

impl Pipeline {
    pub fn new(input_root: &Path, output_root: &Path, params: ProcessingParameters) -> Self {
        Self {
            input_root: input_root.to_path_buf(),
            output_root: output_root.to_path_buf(),
            params,
            notifier: Box::new(LogNotifier),
            progress: None,
        }
    }

    pub fn with_notifier(mut self, notifier: impl CompletionNotifier + 'static) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    pub fn with_progress(
        mut self,
        progress: impl Fn(usize, usize) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn params(&self) -> &ProcessingParameters {
        &self.params
    }

    /// Full run with a discovered GraphicsMagick.
    pub fn run(&self, cancel: &CancellationToken) -> RunSummary {
        self.run_inner(cancel, || {
            let tool = gm_tool::discover()?;
            Ok(GmExecutor::new(&tool.path))
        })
    }

    /// Full run with a caller-supplied executor; tool discovery is skipped.
    pub fn run_with_executor<E: CommandExecutor>(
        &self,
        executor: E,
        cancel: &CancellationToken,
    ) -> RunSummary {
        self.run_inner(cancel, || Ok(executor))
    }

    fn run_inner<E, F>(&self, cancel: &CancellationToken, make_executor: F) -> RunSummary
    where
        E: CommandExecutor,
        F: FnOnce() -> Result<E>,
    {
        let started = Instant::now();

        let mut summary = match self.execute(cancel, make_executor) {
            Ok(summary) => summary,
            Err(e) => {
                if e.is_cancelled() {
                    warn!("Run cancelled before execution");
                } else {
                    error!(error = %e, "Run aborted");
                }
                RunSummary {
                    cancelled: cancel.is_cancelled(),
                    aborted: (!e.is_cancelled()).then(|| e.to_string()),
                    ..Default::default()
                }
            }
        };
        summary.elapsed = started.elapsed();

        self.notifier
            .notify(summary.processed, summary.failed_count(), summary.elapsed);
        summary
    }

    fn execute<E, F>(&self, cancel: &CancellationToken, make_executor: F) -> Result<RunSummary>
    where
        E: CommandExecutor,
        F: FnOnce() -> Result<E>,
    {
        self.check_roots()?;
        let executor = make_executor()?;

        std::fs::create_dir_all(&self.output_root).map_err(|source| {
            ProcessingError::DirectoryCreateFailed {
                path: self.output_root.clone(),
                source,
            }
        })?;

        let plan = self.build_plan(cancel)?;
        let duplicates = DuplicateIndex::from_scans(&plan.scans);
        let runner = ConvertRunner::new(self.params.clone(), duplicates, executor);

        let report = engine::run(
            plan.tasks,
            plan.workers,
            &runner,
            cancel,
            self.progress.as_deref(),
        );

        Ok(RunSummary {
            processed: report.processed,
            failed: report.failed,
            global_processed: report.global_processed,
            tasks_dispatched: report.tasks_dispatched,
            tasks_total: report.tasks_total,
            cancelled: cancel.is_cancelled(),
            aborted: None,
            elapsed: Duration::ZERO,
        })
    }

    /// Validate parameters and both roots.
    fn check_roots(&self) -> Result<()> {
        self.params.validate()?;
        safety::check_dangerous_directory(&self.output_root)
            .map_err(ProcessingError::InvalidParameter)?;
        safety::check_output_outside_input(&self.input_root, &self.output_root)
            .map_err(ProcessingError::InvalidParameter)?;
        Ok(())
    }

    /// Analyze, tune and organize. Fails with `NoImagesFound` when nothing
    /// is convertible and `ProcessingCancelled` when analysis was cut short
    /// before finding anything.
    pub fn build_plan(&self, cancel: &CancellationToken) -> Result<RunPlan> {
        self.params.validate()?;

        let scans = analyzer::analyze(&self.input_root, self.params.width_threshold, cancel)?;
        if scans.is_empty() {
            cancel.check()?;
            return Err(ProcessingError::NoImagesFound(self.input_root.clone()));
        }

        let global_images = analyzer::pool_global_images(&scans);
        let total_images: usize = scans.iter().map(|s| s.images.len()).sum();
        let Tuning {
            workers,
            batch_size,
        } = auto_tune::tune(self.params.workers, self.params.batch_size, total_images);

        info!(
            directories = scans.len(),
            global_images = global_images.len(),
            total_images,
            workers,
            batch_size,
            auto = self.params.is_auto(),
            "Run planned"
        );

        let organizer =
            TaskOrganizer::new(&self.output_root, self.params.is_auto(), workers, batch_size);
        let tasks = organizer.organize(&scans, &global_images);

        Ok(RunPlan {
            scans,
            total_images,
            workers,
            batch_size,
            tasks,
        })
    }

    /// Dry run: the plan plus every command that would be streamed. Nothing
    /// is created on disk and no tool is launched.
    pub fn plan_commands(&self, cancel: &CancellationToken) -> Result<(RunPlan, Vec<PlannedTask>)> {
        self.check_roots()?;
        let plan = self.build_plan(cancel)?;

        let paths = PathManager::new();
        let duplicates = DuplicateIndex::from_scans(&plan.scans);
        let builder = CommandBuilder::new(&self.params, &paths, &duplicates);

        let mut planned = Vec::with_capacity(plan.tasks.len());
        for task in &plan.tasks {
            let batch =
                prepare_batch(task, &builder, cancel).ok_or(ProcessingError::ProcessingCancelled)?;
            planned.push(PlannedTask {
                task: task.clone(),
                batch,
            });
        }
        Ok((plan, planned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::test_images::write_image;
    use crate::runner::RecordingExecutor;
    use crate::types::DirectoryCategory;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct CapturingNotifier {
        calls: Arc<Mutex<Vec<(usize, usize)>>>,
    }

    impl CompletionNotifier for CapturingNotifier {
        fn notify(&self, processed: usize, failed: usize, _duration: Duration) {
            self.calls.lock().unwrap().push((processed, failed));
        }
    }

    struct Fixture {
        _root: TempDir,
        input: PathBuf,
        output: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let input = root.path().join("in");
        let output = root.path().join("out");
        fs::create_dir_all(&input).unwrap();
        Fixture {
            input,
            output,
            _root: root,
        }
    }

    fn chapter(input: &Path, name: &str, widths: &[u32]) {
        let dir = input.join(name);
        fs::create_dir_all(&dir).unwrap();
        for (i, w) in widths.iter().enumerate() {
            write_image(&dir, &format!("{:03}.png", i), *w, 6);
        }
    }

    /// Shared recording executor so the test can inspect it after the run.
    #[derive(Clone, Default)]
    struct SharedRecorder(Arc<RecordingExecutor>);

    impl CommandExecutor for SharedRecorder {
        fn execute(&self, commands: &[String], cancel: &CancellationToken) -> Result<()> {
            self.0.execute(commands, cancel)
        }
    }

    #[test]
    fn test_narrow_directory_runs_as_one_global_batch() {
        let fx = fixture();
        chapter(&fx.input, "ch01", &[800, 800, 800]);

        let notifier = CapturingNotifier::default();
        let recorder = SharedRecorder::default();
        let summary = Pipeline::new(&fx.input, &fx.output, ProcessingParameters::default())
            .with_notifier(notifier.clone())
            .run_with_executor(recorder.clone(), &CancellationToken::new());

        assert!(summary.aborted.is_none());
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.global_processed, 3);
        assert_eq!(summary.tasks_total, 1);

        let batches = recorder.0.batches();
        assert_eq!(batches.len(), 1, "one subprocess invocation");
        assert_eq!(batches[0].len(), 3);
        assert!(batches[0].iter().all(|c| !c.contains("-crop")));
        assert!(batches[0][0].ends_with(&format!("'{}'", fx.output.join("000.jpg").display())));

        assert_eq!(*notifier.calls.lock().unwrap(), vec![(3, 0)]);
    }

    #[test]
    fn test_wide_page_directory_is_isolated_and_split() {
        let fx = fixture();
        chapter(&fx.input, "spreads", &[1800]);

        let pipeline = Pipeline::new(&fx.input, &fx.output, ProcessingParameters::default());
        let plan = pipeline.build_plan(&CancellationToken::new()).unwrap();
        assert_eq!(plan.scans[0].category, DirectoryCategory::Isolated);

        let recorder = SharedRecorder::default();
        let summary = pipeline.run_with_executor(recorder.clone(), &CancellationToken::new());
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.global_processed, 0);

        let commands = &recorder.0.batches()[0];
        assert_eq!(commands.len(), 2);
        assert!(commands[0].contains("-crop 900x6+900+0"));
        assert!(commands[0].ends_with("000-1.jpg'"));
        assert!(commands[1].contains("-crop 900x6+0+0"));
        assert!(commands[1].ends_with("000-2.jpg'"));
        assert!(fx.output.join("spreads").is_dir());
    }

    #[test]
    fn test_duplicate_base_names_get_extension() {
        let fx = fixture();
        let dir = fx.input.join("ch");
        fs::create_dir_all(&dir).unwrap();
        write_image(&dir, "page.jpg", 800, 6);
        write_image(&dir, "page.png", 800, 6);

        let (_, planned) = Pipeline::new(&fx.input, &fx.output, ProcessingParameters::default())
            .plan_commands(&CancellationToken::new())
            .unwrap();
        let commands: Vec<&String> = planned.iter().flat_map(|p| &p.batch.commands).collect();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].ends_with("page_jpg.jpg'"));
        assert!(commands[1].ends_with("page_png.jpg'"));
        assert!(!fx.output.exists(), "plan must not touch the output root");
    }

    #[test]
    fn test_invalid_parameters_abort_without_dispatch() {
        let fx = fixture();
        chapter(&fx.input, "ch01", &[800]);
        let params = ProcessingParameters {
            quality: 0,
            ..Default::default()
        };

        let notifier = CapturingNotifier::default();
        let recorder = SharedRecorder::default();
        let summary = Pipeline::new(&fx.input, &fx.output, params)
            .with_notifier(notifier.clone())
            .run_with_executor(recorder.clone(), &CancellationToken::new());

        assert!(summary.aborted.unwrap().contains("quality"));
        assert!(recorder.0.batches().is_empty());
        assert_eq!(notifier.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_tool_discovery_failure_aborts() {
        let fx = fixture();
        chapter(&fx.input, "ch01", &[800]);
        let pipeline = Pipeline::new(&fx.input, &fx.output, ProcessingParameters::default());

        let missing_tool = || -> Result<RecordingExecutor> {
            Err(ProcessingError::GraphicsMagickNotFound { searched: vec![] })
        };
        let summary = pipeline.run_inner(&CancellationToken::new(), missing_tool);
        assert!(summary.aborted.unwrap().contains("GraphicsMagick not found"));
        assert_eq!(summary.tasks_dispatched, 0);
        assert!(!fx.output.exists());
    }

    #[test]
    fn test_output_inside_input_is_rejected() {
        let fx = fixture();
        chapter(&fx.input, "ch01", &[800]);
        let nested = fx.input.join("out");
        let summary = Pipeline::new(&fx.input, &nested, ProcessingParameters::default())
            .run_with_executor(RecordingExecutor::new(), &CancellationToken::new());
        assert!(summary.aborted.is_some());
    }

    #[test]
    fn test_empty_input_reports_no_images() {
        let fx = fixture();
        let summary = Pipeline::new(&fx.input, &fx.output, ProcessingParameters::default())
            .run_with_executor(RecordingExecutor::new(), &CancellationToken::new());
        assert!(summary.aborted.unwrap().contains("No images found"));
    }

    #[test]
    fn test_cancelled_run_still_summarizes_and_notifies() {
        let fx = fixture();
        chapter(&fx.input, "ch01", &[800, 800]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let notifier = CapturingNotifier::default();
        let summary = Pipeline::new(&fx.input, &fx.output, ProcessingParameters::default())
            .with_notifier(notifier.clone())
            .run_with_executor(RecordingExecutor::new(), &cancel);

        assert!(summary.cancelled);
        assert!(summary.aborted.is_none());
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.status_label(), "CANCELLED");
        assert_eq!(*notifier.calls.lock().unwrap(), vec![(0, 0)]);
    }

    #[test]
    fn test_mixed_input_counts_every_image_once() {
        let fx = fixture();
        chapter(&fx.input, "a", &[800, 800, 800, 800]);
        chapter(&fx.input, "b", &[800, 1800]);
        chapter(&fx.input, "c", &[700]);

        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&progress);
        let recorder = SharedRecorder::default();
        let summary = Pipeline::new(&fx.input, &fx.output, ProcessingParameters::default())
            .with_progress(move |done, total| sink.lock().unwrap().push((done, total)))
            .run_with_executor(recorder.clone(), &CancellationToken::new());

        assert_eq!(summary.processed, 7);
        assert_eq!(summary.global_processed, 5);
        assert!(summary.failed.is_empty());
        assert_eq!(progress.lock().unwrap().last(), Some(&(7, 7)));

        // a/000 and c/000 share the output root
        let all: Vec<String> = recorder.0.batches().into_iter().flatten().collect();
        assert!(all.iter().any(|c| c.ends_with("000_1.jpg'")));
    }
}
