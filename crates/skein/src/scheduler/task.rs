//! Task structure and worker affinity

use crate::scheduler::coroutine::{Coroutine, Resume};
use crate::scheduler::{Context, Shared, SystemCall};
use crate::sync::SyncError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier of a worker thread, in `[1, N]`
pub type WorkerId = u32;

/// Bitmask of workers allowed to run a task; bit `w - 1` stands for worker `w`
pub type WorkerAffinity = u64;

/// Worker id reported before a task has been resumed by any worker
pub const NO_WORKER: WorkerId = 0;

/// Affinity mask accepting every worker
pub const ANY_WORKER: WorkerAffinity = 0;

/// Upper bound on the pool width (one affinity bit per worker)
pub const MAX_WORKERS: usize = WorkerAffinity::BITS as usize;

/// Affinity mask selecting exactly one worker
pub fn affinity_for(worker: WorkerId) -> WorkerAffinity {
    assert!(
        worker != NO_WORKER && worker as usize <= MAX_WORKERS,
        "worker id {worker} is outside [1, {MAX_WORKERS}]"
    );
    1 << (worker - 1)
}

/// Mask with the bits of workers `1..=count` set
pub(crate) fn all_workers(count: usize) -> WorkerAffinity {
    if count >= MAX_WORKERS {
        WorkerAffinity::MAX
    } else {
        ((1 as WorkerAffinity) << count) - 1
    }
}

/// Whether a task with `affinity` may run on `worker`
pub(crate) fn is_eligible(affinity: WorkerAffinity, worker: WorkerId) -> bool {
    affinity == ANY_WORKER || affinity & affinity_for(worker) != 0
}

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub(crate) fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Options applied to a task when it is spawned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOptions {
    worker_affinity: WorkerAffinity,
}

impl TaskOptions {
    /// Options for a task that may run on any worker
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the task to the workers in `mask`
    pub fn worker_affinity(mut self, mask: WorkerAffinity) -> Self {
        self.worker_affinity = mask;
        self
    }

    /// Restrict the task to a single worker
    pub fn pinned(self, worker: WorkerId) -> Self {
        self.worker_affinity(affinity_for(worker))
    }

    /// The configured affinity mask
    pub fn affinity(&self) -> WorkerAffinity {
        self.worker_affinity
    }
}

/// Per-task data shared between the scheduler and the running task body
pub(crate) struct TaskHeader {
    id: TaskId,
    affinity: AtomicU64,
}

impl TaskHeader {
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn affinity(&self) -> WorkerAffinity {
        self.affinity.load(Ordering::Acquire)
    }

    pub(crate) fn set_affinity(&self, mask: WorkerAffinity) {
        self.affinity.store(mask, Ordering::Release);
    }
}

/// Handle for inspecting a task's identity and worker affinity
///
/// Affinity changes take effect the next time the task is picked by a
/// worker.
#[derive(Clone)]
pub struct TaskHandle {
    header: Arc<TaskHeader>,
    shared: Arc<Shared>,
}

impl TaskHandle {
    pub(crate) fn new(header: Arc<TaskHeader>, shared: Arc<Shared>) -> Self {
        Self { header, shared }
    }

    /// Get the task ID
    pub fn id(&self) -> TaskId {
        self.header.id()
    }

    /// Get the worker affinity mask
    pub fn worker_affinity(&self) -> WorkerAffinity {
        self.header.affinity()
    }

    /// Replace the worker affinity mask
    ///
    /// # Panics
    ///
    /// If `mask` selects no worker of the pool.
    pub fn set_worker_affinity(&self, mask: WorkerAffinity) {
        self.shared.set_affinity(&self.header, mask);
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("worker_affinity", &format_args!("{:#x}", self.worker_affinity()))
            .finish()
    }
}

/// Type-erased task function; result delivery happens inside the body
pub(crate) type TaskBody = Box<dyn FnOnce(&Context) + Send + 'static>;

/// A lightweight green thread
pub(crate) struct Task {
    header: Arc<TaskHeader>,

    /// Execution context, started on first resume
    coroutine: Coroutine,

    /// Misuse detected while dispatching, raised inside the task on resume
    fault: Option<SyncError>,
}

impl Task {
    /// Create a new Task
    pub(crate) fn new(options: TaskOptions, body: TaskBody) -> Box<Self> {
        let header = Arc::new(TaskHeader {
            id: TaskId::next(),
            affinity: AtomicU64::new(options.affinity()),
        });

        Box::new(Self {
            header,
            coroutine: Coroutine::new(body),
            fault: None,
        })
    }

    pub(crate) fn id(&self) -> TaskId {
        self.header.id()
    }

    #[cfg(test)]
    pub(crate) fn header(&self) -> &Arc<TaskHeader> {
        &self.header
    }

    pub(crate) fn worker_affinity(&self) -> WorkerAffinity {
        self.header.affinity()
    }

    pub(crate) fn is_eligible(&self, worker: WorkerId) -> bool {
        is_eligible(self.worker_affinity(), worker)
    }

    pub(crate) fn set_fault(&mut self, fault: SyncError) {
        self.fault = Some(fault);
    }

    pub(crate) fn take_fault(&mut self) -> Option<SyncError> {
        self.fault.take()
    }

    /// Continue the task on `worker` until it produces its next system call
    ///
    /// Must only be called by the worker that currently owns the task.
    pub(crate) fn resume(&mut self, worker: WorkerId, shared: &Arc<Shared>) -> SystemCall {
        let resume = Resume {
            worker_id: worker,
            fault: self.take_fault(),
        };
        self.coroutine.resume(&self.header, shared, resume)
    }

    /// Tear down a task that has ended or will never run again
    ///
    /// Waits for the backing thread, so the scheduler lock must not be held.
    pub(crate) fn retire(self: Box<Self>) {
        self.coroutine.close();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("worker_affinity", &format_args!("{:#x}", self.worker_affinity()))
            .field("started", &self.coroutine.is_started())
            .finish()
    }
}
