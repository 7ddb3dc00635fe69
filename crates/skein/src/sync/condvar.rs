//! Task-aware condition variable

use crate::scheduler::{Context, Shared, SystemCall};
use crate::sync::{self, ConditionId, MutexGuard};
use std::fmt;
use std::sync::Arc;

/// Condition variable parking tasks instead of threads
///
/// Waiters are woken in the order they started waiting. A woken task owns the
/// waited-on mutex again by the time [`wait`](Condvar::wait) returns.
pub struct Condvar {
    id: ConditionId,
    shared: Arc<Shared>,
}

impl Condvar {
    /// Create a condition variable in the scheduler running `cx`
    pub fn new(cx: &Context) -> Self {
        Self::with_shared(cx.shared().clone())
    }

    pub(crate) fn with_shared(shared: Arc<Shared>) -> Self {
        let id = shared.create_condition();
        Self { id, shared }
    }

    /// Arena handle of this condition
    pub fn id(&self) -> ConditionId {
        self.id
    }

    /// Release the guard's mutex and park until notified
    pub fn wait<'a>(&self, guard: MutexGuard<'a>) -> MutexGuard<'a> {
        let (mutex, cx) = guard.into_parts();
        let result = cx.call(SystemCall::WaitCondition {
            condition: self.id,
            mutex: mutex.id(),
        });

        let guard = MutexGuard::adopt(mutex, cx);
        sync::check(result);
        guard
    }

    /// Wait for as long as `condition` returns true
    pub fn wait_while<'a, F>(&self, mut guard: MutexGuard<'a>, mut condition: F) -> MutexGuard<'a>
    where
        F: FnMut() -> bool,
    {
        while condition() {
            guard = self.wait(guard);
        }
        guard
    }

    /// Wake the oldest waiter
    pub fn notify_one(&self, cx: &Context) {
        self.notify(cx, 1);
    }

    /// Wake every waiter
    pub fn notify_all(&self, cx: &Context) {
        self.notify(cx, usize::MAX);
    }

    /// Wake up to `count` of the oldest waiters
    ///
    /// A `count` of 0 wakes no one; use [`notify_all`](Self::notify_all) to
    /// wake every waiter.
    pub fn notify(&self, cx: &Context, count: usize) {
        sync::check(cx.call(SystemCall::NotifyCondition {
            condition: self.id,
            count,
        }));
    }

    /// Number of tasks parked on this condition
    pub fn waiter_count(&self) -> usize {
        self.shared.condition_waiters(self.id)
    }
}

impl Drop for Condvar {
    fn drop(&mut self) {
        self.shared.destroy_condition(self.id);
    }
}

impl fmt::Debug for Condvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condvar")
            .field("id", &self.id)
            .field("waiters", &self.waiter_count())
            .finish()
    }
}
