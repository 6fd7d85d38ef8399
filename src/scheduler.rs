//! Bounded worker pool over a flat job list.
//!
//! Workers share a [`JobBoard`]: an atomic claim cursor plus an idempotent
//! failure flag. Under `fail_fast`, a worker stops claiming once the flag is
//! observed, but jobs already claimed run to completion — fail-fast is
//! completion-ordered, not submission-ordered, and that race is accepted.
//! There are no retries; a failed job is terminal for its (task, mode) pair.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use tracing::debug;

use crate::results::TaskRunResult;
use crate::task::{Mode, Task};

/// The atomic unit of execution: one task under one mode. Generated once as
/// a cross product; ownership transfers to exactly one worker.
#[derive(Debug, Clone)]
pub struct Job {
    pub task: Task,
    pub mode: Mode,
}

/// Shared coordination state for the worker pool.
pub struct JobBoard {
    next: AtomicUsize,
    failed: AtomicBool,
}

impl Default for JobBoard {
    fn default() -> Self {
        JobBoard::new()
    }
}

impl JobBoard {
    pub fn new() -> Self {
        JobBoard {
            next: AtomicUsize::new(0),
            failed: AtomicBool::new(false),
        }
    }

    /// Atomically claim the next unclaimed job index, `None` once drained.
    pub fn claim(&self, total: usize) -> Option<usize> {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        (index < total).then_some(index)
    }

    pub fn record_failure(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn failure_observed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Drain every job exactly once through at most `max(1, worker_count)`
/// concurrent workers. Results arrive in completion order; callers re-sort.
pub fn run_jobs<F>(
    jobs: &[Job],
    worker_count: usize,
    fail_fast: bool,
    run_job: F,
) -> Vec<TaskRunResult>
where
    F: Fn(&Job) -> TaskRunResult + Send + Sync,
{
    let board = JobBoard::new();
    let results = Mutex::new(Vec::with_capacity(jobs.len()));
    let workers = worker_count.max(1);
    debug!(jobs = jobs.len(), workers, fail_fast, "scheduling jobs");

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    if fail_fast && board.failure_observed() {
                        return;
                    }
                    let Some(index) = board.claim(jobs.len()) else {
                        return;
                    };
                    let result = run_job(&jobs[index]);
                    if !result.pass {
                        board.record_failure();
                    }
                    results
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(result);
                }
            });
        }
    });

    results.into_inner().unwrap_or_else(PoisonError::into_inner)
}
