//! Task-aware mutex
//!
//! Locking a contended [`Mutex`] parks the calling task in the mutex's FIFO
//! waiter queue; the worker goes on to run other tasks. Unlocking hands
//! ownership straight to the oldest waiter.

use crate::scheduler::{Context, Shared, SystemCall, TaskId};
use crate::sync::{self, MutexId};
use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::thread;

/// Mutual exclusion between tasks
///
/// Not reentrant: locking a mutex the task already holds panics.
pub struct Mutex {
    id: MutexId,
    shared: Arc<Shared>,
}

impl Mutex {
    /// Create a mutex in the scheduler running `cx`
    pub fn new(cx: &Context) -> Self {
        Self::with_shared(cx.shared().clone())
    }

    pub(crate) fn with_shared(shared: Arc<Shared>) -> Self {
        let id = shared.create_mutex();
        Self { id, shared }
    }

    /// Arena handle of this mutex
    pub fn id(&self) -> MutexId {
        self.id
    }

    /// Lock the mutex, parking the task while another task holds it
    ///
    /// # Panics
    ///
    /// If the calling task already holds the mutex.
    pub fn lock<'a>(&'a self, cx: &'a Context) -> MutexGuard<'a> {
        debug_assert!(
            Arc::ptr_eq(&self.shared, cx.shared()),
            "mutex used with a task of another scheduler"
        );
        sync::check(cx.call(SystemCall::LockMutex(self.id)));
        MutexGuard::adopt(self, cx)
    }

    /// Task currently holding the mutex
    pub fn owner(&self) -> Option<TaskId> {
        self.shared.mutex_owner(self.id)
    }

    /// Whether some task holds the mutex
    pub fn is_locked(&self) -> bool {
        self.owner().is_some()
    }

    /// Number of tasks parked waiting for the mutex
    pub fn waiting_count(&self) -> usize {
        self.shared.mutex_waiters(self.id)
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        self.shared.destroy_mutex(self.id);
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("id", &self.id)
            .field("owner", &self.owner())
            .finish()
    }
}

/// Proof that the running task holds a [`Mutex`]; unlocks on drop
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
    cx: &'a Context,
}

impl<'a> MutexGuard<'a> {
    /// Wrap a mutex the task of `cx` already owns
    pub(crate) fn adopt(mutex: &'a Mutex, cx: &'a Context) -> Self {
        Self { mutex, cx }
    }

    /// Give up the guard without unlocking
    pub(crate) fn into_parts(self) -> (&'a Mutex, &'a Context) {
        let guard = ManuallyDrop::new(self);
        (guard.mutex, guard.cx)
    }

    /// The locked mutex
    pub fn mutex(&self) -> &'a Mutex {
        self.mutex
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        let result = self.cx.call(SystemCall::UnlockMutex(self.mutex.id));
        if thread::panicking() {
            if let Err(err) = result {
                tracing::warn!(mutex = ?self.mutex.id, %err, "unlock failed while unwinding");
            }
        } else {
            sync::check(result);
        }
    }
}

impl fmt::Debug for MutexGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexGuard")
            .field("mutex", &self.mutex.id)
            .field("task", &self.cx.task_id())
            .finish()
    }
}
