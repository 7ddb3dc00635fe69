//! Worker thread that resumes tasks
//!
//! A worker alternates between two halves: with the scheduler lock held it
//! applies the previous task's system call and picks the next task; with the
//! lock released it resumes that task until it produces another system call.

use crate::scheduler::shared::Step;
use crate::scheduler::{Shared, SystemCall, Task, WorkerId};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread;

/// Lifecycle of a worker thread
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Spawned, waiting for the rest of the pool to check in
    Starting = 0,
    /// Resuming tasks
    Running = 1,
    /// Out of the scheduling loop, waiting for the rest of the pool to stop
    Draining = 2,
    /// Thread finished
    Stopped = 3,
}

impl WorkerPhase {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerPhase::Starting,
            1 => WorkerPhase::Running,
            2 => WorkerPhase::Draining,
            _ => WorkerPhase::Stopped,
        }
    }
}

#[derive(Default)]
struct Arrivals {
    started: usize,
    stopped: usize,
}

impl Arrivals {
    fn started(&mut self) -> &mut usize {
        &mut self.started
    }

    fn stopped(&mut self) -> &mut usize {
        &mut self.stopped
    }
}

/// Start and stop barrier for the worker pool
pub(crate) struct Rendezvous {
    expected: usize,
    arrivals: Mutex<Arrivals>,
    condition: Condvar,
}

impl Rendezvous {
    pub(crate) fn new(expected: usize) -> Self {
        Self {
            expected,
            arrivals: Mutex::new(Arrivals::default()),
            condition: Condvar::new(),
        }
    }

    /// Block until every worker has started
    pub(crate) fn arrive_start(&self) {
        self.arrive(Arrivals::started);
    }

    /// Block until every worker has left the scheduling loop
    pub(crate) fn arrive_stop(&self) {
        self.arrive(Arrivals::stopped);
    }

    fn arrive(&self, counter: fn(&mut Arrivals) -> &mut usize) {
        let mut arrivals = self.arrivals.lock();
        *counter(&mut *arrivals) += 1;

        if *counter(&mut *arrivals) == self.expected {
            self.condition.notify_all();
            return;
        }
        while *counter(&mut *arrivals) < self.expected {
            self.condition.wait(&mut arrivals);
        }
    }
}

/// Worker thread that executes Tasks
pub(crate) struct Worker {
    id: WorkerId,
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    /// Spawn the worker thread
    pub(crate) fn spawn(id: WorkerId, shared: Arc<Shared>) -> Self {
        let handle = thread::Builder::new()
            .name(format!("{}-worker-{}", shared.config().thread_name, id))
            .spawn(move || Worker::run_loop(id, shared))
            .expect("Failed to spawn worker thread");

        Self {
            id,
            handle: Some(handle),
        }
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    /// Wait for the worker thread to return
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("Failed to join worker thread");
        }
    }

    /// Worker thread main loop
    fn run_loop(id: WorkerId, shared: Arc<Shared>) {
        tracing::debug!(worker = id, "worker starting");
        shared.rendezvous().arrive_start();
        shared.set_phase(id, WorkerPhase::Running);

        let mut call = SystemCall::Yield;
        let mut current: Option<Box<Task>> = None;

        loop {
            let mut task = {
                let mut state = shared.lock();
                let next = match shared.dispatch(&mut state, call, current.take()) {
                    Step::Continue(task) => Some(task),
                    Step::Reschedule => shared.next_task(&mut state, id),
                    Step::Retire(ended) => {
                        MutexGuard::unlocked(&mut state, || ended.retire());
                        shared.next_task(&mut state, id)
                    }
                };
                match next {
                    Some(task) => task,
                    None => break,
                }
            };

            call = task.resume(id, &shared);
            current = Some(task);
        }

        shared.set_phase(id, WorkerPhase::Draining);
        tracing::debug!(worker = id, "worker draining");
        shared.rendezvous().arrive_stop();
        shared.set_phase(id, WorkerPhase::Stopped);
        tracing::debug!(worker = id, "worker stopped");
    }
}
