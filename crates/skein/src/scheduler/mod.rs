//! Task Scheduler - Cooperative M:N Concurrency
//!
//! A fixed pool of worker threads resumes tasks one slice at a time. A task
//! runs until it hands a [`SystemCall`](syscall::SystemCall) back to its
//! worker; the worker then takes the scheduler lock, applies the call to the
//! ready and waiter queues, picks the next task and resumes it with the lock
//! released.

mod context;
mod coroutine;
#[allow(clippy::module_inception)]
mod scheduler;
mod shared;
mod syscall;
mod task;
mod worker;

pub use context::Context;
pub use scheduler::{Scheduler, SchedulerStats};
pub use task::{
    affinity_for, TaskHandle, TaskId, TaskOptions, WorkerAffinity, WorkerId, ANY_WORKER,
    MAX_WORKERS, NO_WORKER,
};
pub use worker::WorkerPhase;

pub(crate) use coroutine::ForcedUnwind;
pub(crate) use shared::Shared;
pub(crate) use syscall::SystemCall;
pub(crate) use task::{Task, TaskBody};
