//! Promise / Future pair

use crate::future::{FutureError, TaskError};
use crate::scheduler::{Context, Shared, TaskOptions};
use crate::sync::{Condvar, Mutex};
use parking_lot::Mutex as SlotLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

enum Slot<T> {
    Pending,
    Ready(Result<T, TaskError>),
    Taken,
}

/// State shared by a promise and its future
///
/// `slot` is only written while `mutex` is held, so a task that checks the
/// slot under `mutex` and then waits on `condition` cannot miss the wake-up.
pub(crate) struct FutureState<T> {
    mutex: Mutex,
    condition: Condvar,
    slot: SlotLock<Slot<T>>,
}

impl<T> FutureState<T> {
    fn new(shared: &Arc<Shared>) -> Self {
        Self {
            mutex: Mutex::with_shared(shared.clone()),
            condition: Condvar::with_shared(shared.clone()),
            slot: SlotLock::new(Slot::Pending),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        !matches!(*self.slot.lock(), Slot::Pending)
    }

    /// Park the calling task until a value or panic is stored
    pub(crate) fn wait(&self, cx: &Context) {
        let guard = self.mutex.lock(cx);
        let _guard = self.condition.wait_while(guard, || !self.is_ready());
    }

    fn store(&self, cx: &Context, outcome: Result<T, TaskError>) -> Result<(), FutureError> {
        let _guard = self.mutex.lock(cx);
        {
            let mut slot = self.slot.lock();
            if !matches!(*slot, Slot::Pending) {
                return Err(FutureError::AlreadySatisfied);
            }
            *slot = Slot::Ready(outcome);
        }
        self.condition.notify_all(cx);
        Ok(())
    }

    fn take(&self) -> Option<Result<T, TaskError>> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(outcome) => Some(outcome),
            other => {
                *slot = other;
                None
            }
        }
    }
}

/// Write side of a single-assignment result
pub struct Promise<T> {
    state: Arc<FutureState<T>>,
    future_taken: AtomicBool,
}

impl<T> Promise<T> {
    /// Create a promise in the scheduler running `cx`
    pub fn new(cx: &Context) -> Self {
        Self::with_shared(cx.shared())
    }

    fn with_shared(shared: &Arc<Shared>) -> Self {
        Self {
            state: Arc::new(FutureState::new(shared)),
            future_taken: AtomicBool::new(false),
        }
    }

    /// A promise whose future has already been handed out
    pub(crate) fn pair(shared: &Arc<Shared>) -> (Self, Future<T>) {
        let promise = Self::with_shared(shared);
        promise.future_taken.store(true, Ordering::Relaxed);
        let future = Future {
            state: promise.state.clone(),
        };
        (promise, future)
    }

    /// Hand out the read side; succeeds once
    pub fn get_future(&self) -> Result<Future<T>, FutureError> {
        if self.future_taken.swap(true, Ordering::AcqRel) {
            return Err(FutureError::AlreadyRetrieved);
        }
        Ok(Future {
            state: self.state.clone(),
        })
    }

    /// Store a value and wake every waiting task
    pub fn set_value(&self, cx: &Context, value: T) -> Result<(), FutureError> {
        self.state.store(cx, Ok(value))
    }

    /// Store a panic payload and wake every waiting task
    pub fn set_panic(
        &self,
        cx: &Context,
        payload: Box<dyn std::any::Any + Send + 'static>,
    ) -> Result<(), FutureError> {
        self.state.store(cx, Err(TaskError::Panicked(payload)))
    }

    /// Store the outcome of the task owning this promise
    pub(crate) fn fulfil(&self, cx: &Context, outcome: Result<T, TaskError>) {
        if self.state.store(cx, outcome).is_err() {
            tracing::warn!(task = %cx.task_id(), "task result already stored");
        }
    }

    /// Whether a value or panic has been stored
    pub fn is_satisfied(&self) -> bool {
        self.state.is_ready()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("satisfied", &self.is_satisfied())
            .field("future_taken", &self.future_taken.load(Ordering::Relaxed))
            .finish()
    }
}

/// Read side of a single-assignment result
pub struct Future<T> {
    state: Arc<FutureState<T>>,
}

impl<T> Future<T> {
    /// Whether the value (or panic) is available without waiting
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Park the calling task until the value is available
    pub fn wait(&self, cx: &Context) {
        self.state.wait(cx);
    }

    /// Park until ready, then take the value
    ///
    /// Returns `Err(TaskError::Panicked)` when the producing task panicked.
    pub fn get(self, cx: &Context) -> Result<T, TaskError> {
        self.wait(cx);
        match self.state.take() {
            Some(outcome) => outcome,
            None => unreachable!("ready future holds no value"),
        }
    }

    /// Take the value if it is already available
    pub(crate) fn try_take(&self) -> Option<Result<T, TaskError>> {
        self.state.take()
    }

    pub(crate) fn state(&self) -> Arc<FutureState<T>> {
        self.state.clone()
    }
}

impl<T: Send + 'static> Future<T> {
    /// Run `f` on this future once it is ready, as a new task
    pub fn then<U, F>(self, cx: &Context, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(&Context, Future<T>) -> U + Send + 'static,
    {
        self.then_with(cx, TaskOptions::new(), f)
    }

    /// Like [`then`](Self::then) with explicit options for the new task
    ///
    /// If the value is not there yet the continuation is created parked on
    /// this future's condition, so it cannot run early.
    pub fn then_with<U, F>(self, cx: &Context, options: TaskOptions, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(&Context, Future<T>) -> U + Send + 'static,
    {
        let state = self.state.clone();
        let guard = state.mutex.lock(cx);

        if state.is_ready() {
            drop(guard);
            cx.spawn_with(options, move |cx| f(cx, self))
        } else {
            cx.spawn_blocked(options, &state.condition, guard, move |cx| f(cx, self))
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("ready", &self.is_ready())
            .finish()
    }
}
