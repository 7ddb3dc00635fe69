//! Per-task handle passed to every task body
//!
//! All task-only operations go through a [`Context`]: spawning children,
//! yielding, locking task mutexes and waiting on task conditions. A context
//! only exists inside a running task, so these operations can never be called
//! from a plain thread.

use crate::future::{Future, Promise, TaskError};
use crate::scheduler::coroutine::Resume;
use crate::scheduler::task::TaskHeader;
use crate::scheduler::{
    ForcedUnwind, Shared, SystemCall, Task, TaskBody, TaskHandle, TaskId, TaskOptions,
    WorkerAffinity, WorkerId,
};
use crate::sync::{self, Condvar, MutexGuard, MutexId, SyncError};
use crossbeam::channel::{Receiver, Sender};
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

/// Handle to the scheduler from inside a running task
pub struct Context {
    header: Arc<TaskHeader>,
    shared: Arc<Shared>,
    calls: Sender<SystemCall>,
    resumes: Receiver<Resume>,

    /// Worker that resumed the task for the current slice
    worker_id: Cell<WorkerId>,
}

impl Context {
    pub(crate) fn new(
        header: Arc<TaskHeader>,
        shared: Arc<Shared>,
        calls: Sender<SystemCall>,
        resumes: Receiver<Resume>,
        worker_id: WorkerId,
    ) -> Self {
        Self {
            header,
            shared,
            calls,
            resumes,
            worker_id: Cell::new(worker_id),
        }
    }

    /// Id of the running task
    pub fn task_id(&self) -> TaskId {
        self.header.id()
    }

    /// Worker executing the running task, in `[1, num_workers()]`
    ///
    /// May change after any suspension point.
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id.get()
    }

    /// Affinity mask of the running task
    pub fn worker_affinity(&self) -> WorkerAffinity {
        self.header.affinity()
    }

    /// Replace the affinity mask of the running task
    ///
    /// Applies from the next time the task is picked by a worker, e.g.
    /// after [`yield_now`](Self::yield_now).
    pub fn set_worker_affinity(&self, mask: WorkerAffinity) {
        self.shared.set_affinity(&self.header, mask);
    }

    /// Handle of the running task
    pub fn current_task(&self) -> TaskHandle {
        TaskHandle::new(self.header.clone(), self.shared.clone())
    }

    /// Size of the worker pool
    pub fn num_workers(&self) -> usize {
        self.shared.num_workers()
    }

    /// Let other ready tasks run before continuing
    pub fn yield_now(&self) {
        sync::check(self.call(SystemCall::Yield));
    }

    /// Spawn a child task that may run on any worker
    pub fn spawn<T, F>(&self, f: F) -> Future<T>
    where
        T: Send + 'static,
        F: FnOnce(&Context) -> T + Send + 'static,
    {
        self.spawn_with(TaskOptions::new(), f)
    }

    /// Spawn a child task with explicit options
    ///
    /// The child is ready immediately; the caller keeps running.
    pub fn spawn_with<T, F>(&self, options: TaskOptions, f: F) -> Future<T>
    where
        T: Send + 'static,
        F: FnOnce(&Context) -> T + Send + 'static,
    {
        self.shared.assert_usable_affinity(options.affinity());

        let (promise, future) = Promise::pair(&self.shared);
        let task = Task::new(options, Self::wrap(promise, f));
        tracing::trace!(parent = %self.task_id(), child = %task.id(), "spawn");

        sync::check(self.call(SystemCall::Queue(task)));
        future
    }

    /// Spawn a child task parked on `condvar`
    ///
    /// The guard's mutex is released. The child does not run until `condvar`
    /// is notified; it then reacquires the mutex, releases it again and runs
    /// `f`. Used to attach work to an event that has not happened yet.
    pub fn spawn_blocked<T, F>(
        &self,
        options: TaskOptions,
        condvar: &Condvar,
        guard: MutexGuard<'_>,
        f: F,
    ) -> Future<T>
    where
        T: Send + 'static,
        F: FnOnce(&Context) -> T + Send + 'static,
    {
        self.shared.assert_usable_affinity(options.affinity());

        let (mutex, _) = guard.into_parts();
        let mutex = mutex.id();

        let (promise, future) = Promise::pair(&self.shared);
        let body = move |cx: &Context| {
            cx.release_inherited(mutex);
            f(cx)
        };
        let task = Task::new(options, Self::wrap(promise, body));
        tracing::trace!(parent = %self.task_id(), child = %task.id(), "spawn blocked");

        sync::check(self.call(SystemCall::QueueBlocked {
            task,
            condition: condvar.id(),
            mutex,
        }));
        future
    }

    /// Hand a system call to the worker and suspend until resumed
    ///
    /// Returns the misuse the dispatcher detected, if any. Once the worker
    /// side is gone the task unwinds, unless it is already panicking.
    pub(crate) fn call(&self, call: SystemCall) -> Result<(), SyncError> {
        if self.calls.send(call).is_err() {
            return Self::detached();
        }

        match self.resumes.recv() {
            Ok(resume) => {
                self.worker_id.set(resume.worker_id);
                match resume.fault {
                    Some(fault) => Err(fault),
                    None => Ok(()),
                }
            }
            Err(_) => Self::detached(),
        }
    }

    /// Report that the body returned; the task thread exits afterwards
    pub(crate) fn finish(&self) {
        if self.calls.send(SystemCall::End).is_err() {
            tracing::trace!(task = %self.task_id(), "worker gone before task end");
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Deliver the body's return value or panic to its promise
    pub(crate) fn wrap<T, F>(promise: Promise<T>, f: F) -> TaskBody
    where
        T: Send + 'static,
        F: FnOnce(&Context) -> T + Send + 'static,
    {
        Box::new(move |cx: &Context| {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| f(cx))) {
                Ok(value) => Ok(value),
                Err(payload) if payload.is::<ForcedUnwind>() => panic::resume_unwind(payload),
                Err(payload) => {
                    tracing::debug!(task = %cx.task_id(), "task body panicked");
                    Err(TaskError::Panicked(payload))
                }
            };
            promise.fulfil(cx, outcome);
        })
    }

    /// Release a mutex handed over by a blocked spawn
    fn release_inherited(&self, mutex: MutexId) {
        if self.shared.mutex_owner(mutex) == Some(self.task_id()) {
            sync::check(self.call(SystemCall::UnlockMutex(mutex)));
        }
    }

    fn detached() -> Result<(), SyncError> {
        if thread::panicking() {
            Err(SyncError::Detached)
        } else {
            panic::resume_unwind(Box::new(ForcedUnwind))
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("task_id", &self.task_id())
            .field("worker_id", &self.worker_id())
            .field("worker_affinity", &format_args!("{:#x}", self.worker_affinity()))
            .finish()
    }
}
