//! Task-level synchronization primitives
//!
//! [`Mutex`] and [`Condvar`] park the calling *task* instead of blocking the
//! worker thread. Their state lives in scheduler-owned arenas and is only
//! touched by the dispatcher under the scheduler lock.

mod condvar;
mod mutex;
mod token;

pub use condvar::Condvar;
pub use mutex::{Mutex, MutexGuard};

pub(crate) use token::{Acquire, ConditionToken, MutexToken};

use crate::scheduler::TaskId;

/// Handle of a mutex token in the scheduler's arena
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MutexId(pub(crate) usize);

/// Handle of a condition token in the scheduler's arena
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ConditionId(pub(crate) usize);

/// Misuse detected by the dispatcher
///
/// Reported back to the offending task, which panics with it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Mutex not found in the arena
    #[error("Mutex {0:?} not found")]
    UnknownMutex(MutexId),

    /// Condition not found in the arena
    #[error("Condition {0:?} not found")]
    UnknownCondition(ConditionId),

    /// Unlock or wait by a task that does not hold the mutex
    #[error("Task {task} does not own mutex {mutex:?}")]
    NotOwner {
        /// Mutex involved
        mutex: MutexId,
        /// Offending task
        task: TaskId,
    },

    /// Mutex already locked by the same task (reentrant lock attempt)
    #[error("Mutex {mutex:?} already locked by task {task}")]
    AlreadyLocked {
        /// Mutex involved
        mutex: MutexId,
        /// Offending task
        task: TaskId,
    },

    /// The scheduler side of the task has gone away
    #[error("Task is detached from its scheduler")]
    Detached,
}

/// Raise a dispatcher-reported misuse inside the calling task
pub(crate) fn check(result: Result<(), SyncError>) {
    match result {
        Ok(()) | Err(SyncError::Detached) => {}
        Err(err) => panic!("{err}"),
    }
}
