//! Execution Engine
//!
//! 🔥 v0.1.1: 任务调度 - a rayon pool of exactly `max_concurrency` threads.
//! Each pool thread loops: check cancellation, take the next task from the
//! `PriorityScheduler`, run it, record the result. The pool size is the
//! concurrency cap. Per-task results funnel into one mutex-guarded aggregate.
//!
//! A panicking runner fails only its own task: the panic is caught and the
//! task's images are recorded as failed, so the run still ends with a report.

use crate::cancel::CancellationToken;
use crate::runner::TaskRunner;
use crate::scheduler::PriorityScheduler;
use crate::types::{BatchResult, BatchTask};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// `(completed images, total images)`, called after every finished task.
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

// ═══════════════════════════════════════════════════════════════
// Aggregation
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineReport {
    pub processed: usize,
    pub failed: Vec<PathBuf>,
    /// Subset of `processed` coming from global-pool tasks.
    pub global_processed: usize,
    pub tasks_total: usize,
    pub tasks_dispatched: usize,
    /// Dispatched tasks that observed cancellation and reported nothing.
    pub tasks_cancelled: usize,
}

struct Aggregator<'a> {
    state: Mutex<AggregateState>,
    total_images: usize,
    progress: Option<&'a ProgressFn>,
}

#[derive(Default)]
struct AggregateState {
    report: EngineReport,
    completed_images: usize,
}

impl<'a> Aggregator<'a> {
    fn new(tasks_total: usize, total_images: usize, progress: Option<&'a ProgressFn>) -> Self {
        Self {
            state: Mutex::new(AggregateState {
                report: EngineReport {
                    tasks_total,
                    ..Default::default()
                },
                completed_images: 0,
            }),
            total_images,
            progress,
        }
    }

    fn dispatched(&self) {
        self.lock().report.tasks_dispatched += 1;
    }

    /// Progress is reported under the lock so callbacks arrive in order.
    fn record(&self, task: &BatchTask, result: BatchResult) {
        let mut state = self.lock();
        let report = &mut state.report;
        if result.cancelled {
            report.tasks_cancelled += 1;
        } else {
            report.processed += result.processed;
            if result.is_global {
                report.global_processed += result.processed;
            }
            report.failed.extend(result.failed);
        }
        state.completed_images += task.images.len();

        if let Some(progress) = self.progress {
            progress(state.completed_images, self.total_images);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AggregateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn into_report(self) -> EngineReport {
        self.state
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .report
    }
}

// ═══════════════════════════════════════════════════════════════
// Dispatch
// ═══════════════════════════════════════════════════════════════

/// Run every task with at most `max_concurrency` in flight.
///
/// Cancellation is checked right before each dispatch; tasks never
/// dispatched are counted nowhere. Returns once every dispatched task has
/// finished.
pub fn run<R: TaskRunner + ?Sized>(
    tasks: Vec<BatchTask>,
    max_concurrency: usize,
    runner: &R,
    cancel: &CancellationToken,
    progress: Option<&ProgressFn>,
) -> EngineReport {
    let workers = max_concurrency.max(1);
    let tasks_total = tasks.len();
    let total_images = tasks.iter().map(|t| t.images.len()).sum();

    info!(
        tasks = tasks_total,
        images = total_images,
        workers,
        "Starting execution"
    );

    let scheduler = PriorityScheduler::new(tasks, workers);
    let aggregator = Aggregator::new(tasks_total, total_images, progress);
    let worker = || work(runner, &scheduler, &aggregator, cancel);

    match rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("comic-batch-{}", i))
        .build()
    {
        Ok(pool) => pool.scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|_| worker());
            }
        }),
        Err(e) => {
            warn!(error = %e, "Failed to create thread pool, running tasks sequentially");
            worker();
        }
    }

    if cancel.is_cancelled() && scheduler.pending() > 0 {
        info!(
            pending = scheduler.pending(),
            "Cancellation observed, remaining tasks not dispatched"
        );
    }

    let report = aggregator.into_report();
    info!(
        processed = report.processed,
        failed = report.failed.len(),
        dispatched = report.tasks_dispatched,
        total = report.tasks_total,
        "Execution finished"
    );
    report
}

/// One pool thread: pull tasks until the scheduler is empty or the run is
/// cancelled.
fn work<R: TaskRunner + ?Sized>(
    runner: &R,
    scheduler: &PriorityScheduler,
    aggregator: &Aggregator<'_>,
    cancel: &CancellationToken,
) {
    while !cancel.is_cancelled() {
        let Some(task) = scheduler.next() else {
            break;
        };

        aggregator.dispatched();
        debug!(
            task = task.id,
            images = task.images.len(),
            priority = ?task.priority,
            high_resolution = task.high_resolution,
            "Dispatching task"
        );

        let result = run_guarded(runner, &task, cancel);
        scheduler.complete(&task);
        aggregator.record(&task, result);
    }
}

/// `runner.run_task` with panics turned into a fully failed task.
fn run_guarded<R: TaskRunner + ?Sized>(
    runner: &R,
    task: &BatchTask,
    cancel: &CancellationToken,
) -> BatchResult {
    match panic::catch_unwind(AssertUnwindSafe(|| runner.run_task(task, cancel))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(task = task.id, panic = %message, "Task panicked, marking its images failed");
            BatchResult::failed(task)
        }
    }
}
