//! Main task scheduler coordinating worker threads

use crate::config::SchedulerConfig;
use crate::future::{Future, Promise, TaskError};
use crate::scheduler::worker::{Worker, WorkerPhase};
use crate::scheduler::{Context, Shared, Task, TaskOptions, WorkerId};
use std::sync::Arc;

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total tasks spawned, the primary task included
    pub tasks_spawned: u64,

    /// Total tasks retired
    pub tasks_completed: u64,

    /// Tasks spawned and not yet retired
    pub active_tasks: usize,
}

/// Main task scheduler
///
/// Owns the worker pool for one run: [`start`](Scheduler::start) launches the
/// primary task on worker 1, [`join`](Scheduler::join) waits until it and
/// every task it spawned have finished.
pub struct Scheduler {
    config: SchedulerConfig,

    /// State of the current or last run
    shared: Option<Arc<Shared>>,

    /// Worker threads of the current run
    workers: Vec<Worker>,

    /// Outcome of the primary task
    result: Option<Future<i32>>,
}

impl Scheduler {
    /// Create a scheduler with the default configuration
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler from an explicit configuration
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            shared: None,
            workers: Vec::new(),
            result: None,
        }
    }

    /// Set the worker count; 0 selects one worker per logical CPU
    ///
    /// # Panics
    ///
    /// If the pool is running.
    pub fn num_workers(&mut self, count: usize) -> &mut Self {
        assert!(!self.is_running(), "cannot resize a running worker pool");
        self.config.num_workers = count;
        self
    }

    /// Worker count the next (or current) run uses
    pub fn worker_count(&self) -> usize {
        self.config.resolved_workers()
    }

    /// Whether workers have been started and not joined yet
    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Launch the worker pool with `primary` as its first task
    ///
    /// The primary task is pinned to worker 1. The pool shuts down once the
    /// primary task and every task spawned from it have finished.
    ///
    /// # Panics
    ///
    /// If the pool is already running.
    pub fn start<F>(&mut self, primary: F) -> &mut Self
    where
        F: FnOnce(&Context) -> i32 + Send + 'static,
    {
        assert!(!self.is_running(), "scheduler is already running");

        let shared = Shared::new(self.config.clone());
        let num_workers = shared.num_workers();
        tracing::debug!(workers = num_workers, "starting worker pool");

        let (promise, result) = Promise::pair(&shared);
        let task = Task::new(TaskOptions::new().pinned(1), Context::wrap(promise, primary));
        tracing::trace!(task = %task.id(), "primary task queued");
        shared.submit(task);

        self.workers = (1..=num_workers)
            .map(|id| Worker::spawn(id as WorkerId, shared.clone()))
            .collect();
        self.shared = Some(shared);
        self.result = Some(result);
        self
    }

    /// Wait for the pool to drain and return the primary task's result
    ///
    /// # Panics
    ///
    /// If the pool was not started.
    pub fn join(&mut self) -> Result<i32, TaskError> {
        assert!(self.is_running(), "join called on a scheduler that is not running");

        self.join_workers();
        let result = self
            .result
            .take()
            .and_then(|future| future.try_take());

        match result {
            Some(outcome) => outcome,
            None => unreachable!("primary task retired without a result"),
        }
    }

    /// Task counters of the current or last run
    pub fn stats(&self) -> SchedulerStats {
        self.shared
            .as_ref()
            .map(|shared| shared.stats())
            .unwrap_or_default()
    }

    /// Phase of each worker of the current or last run, worker 1 first
    pub fn worker_phases(&self) -> Vec<WorkerPhase> {
        self.shared
            .as_ref()
            .map(|shared| shared.phases())
            .unwrap_or_default()
    }

    fn join_workers(&mut self) {
        for worker in &mut self.workers {
            worker.join();
            tracing::trace!(worker = worker.id(), "worker joined");
        }
        self.workers.clear();
        tracing::debug!("worker pool joined");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.is_running() {
            self.join_workers();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_creation() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.is_running());
        assert!(scheduler.worker_count() >= 1);
        assert_eq!(scheduler.stats(), SchedulerStats::default());
        assert!(scheduler.worker_phases().is_empty());
    }

    #[test]
    fn test_num_workers_setter() {
        let mut scheduler = Scheduler::new();
        assert_eq!(scheduler.num_workers(3).worker_count(), 3);
    }

    #[test]
    fn test_start_and_join() {
        let mut scheduler = Scheduler::with_config(SchedulerConfig::default().with_num_workers(2));
        let result = scheduler.start(|_| 7).join();

        assert_eq!(result.unwrap(), 7);
        assert!(!scheduler.is_running());

        let stats = scheduler.stats();
        assert_eq!(stats.tasks_spawned, 1);
        assert_eq!(stats.tasks_completed, 1);
        assert_eq!(stats.active_tasks, 0);
        assert_eq!(scheduler.worker_phases(), vec![WorkerPhase::Stopped; 2]);
    }

    #[test]
    fn test_primary_runs_on_worker_one() {
        let mut scheduler = Scheduler::new();
        let worker = scheduler.num_workers(4).start(|cx| cx.worker_id() as i32).join();
        assert_eq!(worker.unwrap(), 1);
    }

    #[test]
    fn test_restart_after_join() {
        let mut scheduler = Scheduler::new();
        scheduler.num_workers(1);
        assert_eq!(scheduler.start(|_| 1).join().unwrap(), 1);
        assert_eq!(scheduler.start(|_| 2).join().unwrap(), 2);
    }

    #[test]
    #[should_panic(expected = "already running")]
    fn test_double_start_panics() {
        let mut scheduler = Scheduler::new();
        scheduler.num_workers(1).start(|_| 0);
        scheduler.start(|_| 0);
    }

    #[test]
    #[should_panic(expected = "running worker pool")]
    fn test_resize_running_pool_panics() {
        let mut scheduler = Scheduler::new();
        scheduler.num_workers(1).start(|_| 0);
        scheduler.num_workers(2);
    }

    #[test]
    #[should_panic(expected = "not running")]
    fn test_join_without_start_panics() {
        let _ = Scheduler::new().join();
    }

    #[test]
    fn test_drop_joins_running_pool() {
        let mut scheduler = Scheduler::new();
        scheduler.num_workers(2).start(|cx| {
            cx.yield_now();
            0
        });
    }
}
