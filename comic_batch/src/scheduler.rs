//! Task Organizer / Priority Scheduler
//!
//! `TaskOrganizer` turns scan results into `BatchTask`s; `PriorityScheduler`
//! hands them out to the engine while limiting how many high-resolution
//! tasks run at once.

use crate::types::{BatchTask, DirectoryCategory, DirectoryScanResult, ImageRef, Priority};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Images per batch for high-resolution work in auto mode.
pub const HIGH_RES_BATCH_SIZE: usize = 2;
/// Ceiling for the reduced batch size of normal pages pooled alongside
/// high-resolution ones.
pub const MIXED_BATCH_CAP: usize = 50;
/// Cost multiplier of a high-resolution image.
pub const HIGH_RES_COST_FACTOR: u64 = 5;

/// Contiguous chunks of at most `size` items, order preserved.
pub fn split_into_batches<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}

pub fn estimated_cost(image_count: usize, high_resolution: bool) -> u64 {
    let factor = if high_resolution {
        HIGH_RES_COST_FACTOR
    } else {
        1
    };
    image_count as u64 * factor
}

// ═══════════════════════════════════════════════════════════════════════════
// Organizer - 按目录分类生成任务
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct TaskOrganizer {
    output_root: PathBuf,
    auto: bool,
    workers: usize,
    batch_size: usize,
}

impl TaskOrganizer {
    /// `workers`/`batch_size` are the tuned values; `auto` says whether they
    /// came from the calculator.
    pub fn new(output_root: &Path, auto: bool, workers: usize, batch_size: usize) -> Self {
        Self {
            output_root: output_root.to_path_buf(),
            auto,
            workers: workers.max(1),
            batch_size: batch_size.max(1),
        }
    }

    pub fn organize(
        &self,
        scans: &[DirectoryScanResult],
        global_images: &[ImageRef],
    ) -> Vec<BatchTask> {
        let mut tasks = Vec::new();

        for scan in scans
            .iter()
            .filter(|s| s.category == DirectoryCategory::Isolated)
        {
            let priority = if scan.high_resolution {
                Priority::Critical
            } else {
                Priority::High
            };
            let size = self.isolated_batch_size(scan.images.len(), scan.high_resolution);
            let output_dir = self.output_root.join(scan.name());
            debug!(
                directory = %scan.directory.display(),
                images = scan.images.len(),
                batch_size = size,
                ?priority,
                "Organizing isolated directory"
            );
            self.push_batches(
                &mut tasks,
                &scan.images,
                size,
                &output_dir,
                false,
                scan.high_resolution,
                priority,
            );
        }

        if !global_images.is_empty() {
            self.organize_global(&mut tasks, scans, global_images);
        }

        tasks
    }

    fn organize_global(
        &self,
        tasks: &mut Vec<BatchTask>,
        scans: &[DirectoryScanResult],
        global_images: &[ImageRef],
    ) {
        let high_res_dirs: HashSet<&Path> = scans
            .iter()
            .filter(|s| s.high_resolution)
            .map(|s| s.directory.as_path())
            .collect();

        let (high_res, normal): (Vec<ImageRef>, Vec<ImageRef>) = global_images
            .iter()
            .cloned()
            .partition(|image| high_res_dirs.contains(image.directory()));

        let output_dir = self.output_root.clone();

        if high_res_dirs.is_empty() {
            self.push_batches(
                tasks,
                &normal,
                self.batch_size,
                &output_dir,
                true,
                false,
                Priority::Normal,
            );
            return;
        }

        let (high_res_size, mixed_size) = if self.auto {
            (
                HIGH_RES_BATCH_SIZE,
                (self.batch_size / 2).clamp(1, MIXED_BATCH_CAP),
            )
        } else {
            (self.batch_size, self.batch_size)
        };

        debug!(
            high_res = high_res.len(),
            normal = normal.len(),
            high_res_size,
            mixed_size,
            "Organizing mixed global pool"
        );

        self.push_batches(
            tasks,
            &high_res,
            high_res_size,
            &output_dir,
            true,
            true,
            Priority::High,
        );
        self.push_batches(
            tasks,
            &normal,
            mixed_size,
            &output_dir,
            true,
            false,
            Priority::Normal,
        );
    }

    fn isolated_batch_size(&self, image_count: usize, high_resolution: bool) -> usize {
        if !self.auto {
            return self.batch_size;
        }
        if high_resolution {
            // aim for at least 2 batches per worker
            image_count
                .div_ceil(2 * self.workers)
                .clamp(1, HIGH_RES_BATCH_SIZE)
        } else {
            image_count
                .div_ceil(self.workers)
                .clamp(1, self.batch_size)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_batches(
        &self,
        tasks: &mut Vec<BatchTask>,
        images: &[ImageRef],
        size: usize,
        output_dir: &Path,
        is_global: bool,
        high_resolution: bool,
        priority: Priority,
    ) {
        for batch in split_into_batches(images, size) {
            tasks.push(BatchTask {
                id: tasks.len(),
                estimated_cost: estimated_cost(batch.len(), high_resolution),
                images: batch,
                output_dir: output_dir.to_path_buf(),
                batch_size: size,
                is_global,
                high_resolution,
                priority,
            });
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Scheduler - 高分辨率任务限流
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct SchedulerState {
    pending: Vec<BatchTask>,
    high_res_in_flight: usize,
}

/// Hands out tasks one at a time.
///
/// While fewer than `max(1, workers / 2)` high-resolution tasks are in
/// flight, the highest-priority task goes next, costlier first, then FIFO.
/// Once that limit is reached, normal-resolution tasks are preferred in
/// priority then FIFO order; high-resolution tasks are handed out only
/// when nothing else remains.
#[derive(Debug)]
pub struct PriorityScheduler {
    state: Mutex<SchedulerState>,
    high_res_limit: usize,
}

impl PriorityScheduler {
    pub fn new(tasks: Vec<BatchTask>, workers: usize) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                pending: tasks,
                high_res_in_flight: 0,
            }),
            high_res_limit: (workers / 2).max(1),
        }
    }

    pub fn next(&self) -> Option<BatchTask> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let saturated = state.high_res_in_flight >= self.high_res_limit;
        let index = if saturated {
            state
                .pending
                .iter()
                .enumerate()
                .filter(|(_, t)| !t.high_resolution)
                .min_by_key(|(_, t)| (Reverse(t.priority), t.id))
                .map(|(i, _)| i)
                .or_else(|| best_by_priority(&state.pending))
        } else {
            best_by_priority(&state.pending)
        }?;

        let task = state.pending.remove(index);
        if task.high_resolution {
            state.high_res_in_flight += 1;
        }
        Some(task)
    }

    /// Must be called once for every task returned by `next`.
    pub fn complete(&self, task: &BatchTask) {
        if task.high_resolution {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.high_res_in_flight = state.high_res_in_flight.saturating_sub(1);
        }
    }

    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .len()
    }

    pub fn high_res_in_flight(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .high_res_in_flight
    }
}

fn best_by_priority(pending: &[BatchTask]) -> Option<usize> {
    pending
        .iter()
        .enumerate()
        .min_by_key(|(_, t)| (Reverse(t.priority), Reverse(t.estimated_cost), t.id))
        .map(|(i, _)| i)
}
