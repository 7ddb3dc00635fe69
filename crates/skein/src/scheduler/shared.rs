//! Scheduler state shared by all workers, and system-call dispatch
//!
//! Everything in [`State`] is guarded by the single scheduler lock. Workers
//! call [`Shared::dispatch`] with the lock held to apply a task's system call,
//! then [`Shared::next_task`] to pick what to resume next.

use crate::config::SchedulerConfig;
use crate::scheduler::task::{all_workers, TaskHeader, ANY_WORKER};
use crate::scheduler::worker::{Rendezvous, WorkerPhase};
use crate::scheduler::{
    affinity_for, SchedulerStats, SystemCall, Task, TaskId, WorkerAffinity, WorkerId,
};
use crate::sync::{Acquire, ConditionId, ConditionToken, MutexId, MutexToken, SyncError};
use parking_lot::{Condvar, Mutex, MutexGuard};
use slab::Slab;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Queues and counters guarded by the scheduler lock
pub(crate) struct State {
    /// Runnable tasks in arrival order
    ready: VecDeque<Box<Task>>,

    /// Mutex token arena
    mutexes: Slab<MutexToken>,

    /// Condition token arena
    conditions: Slab<ConditionToken>,

    /// Tasks spawned and not yet retired
    live_tasks: usize,

    /// Set once `live_tasks` drops to zero
    quit: bool,

    /// Workers sleeping on their wake-up condition
    idle: WorkerAffinity,

    tasks_spawned: u64,
    tasks_completed: u64,
}

/// What the worker does after a system call has been applied
pub(crate) enum Step {
    /// Resume the calling task again right away
    Continue(Box<Task>),
    /// The caller is parked or queued; pick the next ready task
    Reschedule,
    /// The caller ended; retire it outside the lock, then pick the next task
    Retire(Box<Task>),
}

pub(crate) struct Shared {
    config: SchedulerConfig,
    num_workers: usize,
    state: Mutex<State>,

    /// One wake-up condition per worker, indexed by `worker_id - 1`
    wakeups: Vec<Condvar>,

    rendezvous: Rendezvous,
    phases: Vec<AtomicU8>,
}

impl Shared {
    pub(crate) fn new(config: SchedulerConfig) -> Arc<Self> {
        let num_workers = config.resolved_workers();

        Arc::new(Self {
            config,
            num_workers,
            state: Mutex::new(State {
                ready: VecDeque::new(),
                mutexes: Slab::new(),
                conditions: Slab::new(),
                live_tasks: 0,
                quit: false,
                idle: 0,
                tasks_spawned: 0,
                tasks_completed: 0,
            }),
            wakeups: (0..num_workers).map(|_| Condvar::new()).collect(),
            rendezvous: Rendezvous::new(num_workers),
            phases: (0..num_workers)
                .map(|_| AtomicU8::new(WorkerPhase::Starting as u8))
                .collect(),
        })
    }

    pub(crate) fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub(crate) fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    pub(crate) fn rendezvous(&self) -> &Rendezvous {
        &self.rendezvous
    }

    pub(crate) fn set_phase(&self, worker: WorkerId, phase: WorkerPhase) {
        self.phases[worker as usize - 1].store(phase as u8, Ordering::Release);
    }

    pub(crate) fn phases(&self) -> Vec<WorkerPhase> {
        self.phases
            .iter()
            .map(|phase| WorkerPhase::from_u8(phase.load(Ordering::Acquire)))
            .collect()
    }

    pub(crate) fn stats(&self) -> SchedulerStats {
        let state = self.state.lock();
        SchedulerStats {
            tasks_spawned: state.tasks_spawned,
            tasks_completed: state.tasks_completed,
            active_tasks: state.live_tasks,
        }
    }

    /// Whether some worker of this pool may run a task with `affinity`
    pub(crate) fn accepts_affinity(&self, affinity: WorkerAffinity) -> bool {
        affinity == ANY_WORKER || affinity & all_workers(self.num_workers) != 0
    }

    pub(crate) fn assert_usable_affinity(&self, affinity: WorkerAffinity) {
        assert!(
            self.accepts_affinity(affinity),
            "worker affinity {affinity:#x} selects no worker of a {}-worker pool",
            self.num_workers
        );
    }

    /// Replace a task's affinity mask under the scheduler lock
    ///
    /// A task already sitting in the ready queue may now be eligible for a
    /// sleeping worker that was not woken for it.
    pub(crate) fn set_affinity(&self, header: &TaskHeader, affinity: WorkerAffinity) {
        self.assert_usable_affinity(affinity);

        let mut state = self.state.lock();
        header.set_affinity(affinity);
        if state.ready.iter().any(|task| task.id() == header.id()) {
            self.wake_one(&mut state, affinity);
        }
    }

    /// Queue the primary task before the workers start
    pub(crate) fn submit(&self, task: Box<Task>) {
        let mut state = self.state.lock();
        Self::admit(&mut state);
        self.make_ready(&mut state, task);
    }

    pub(crate) fn create_mutex(&self) -> MutexId {
        MutexId(self.state.lock().mutexes.insert(MutexToken::default()))
    }

    /// Free a mutex slot, cancelling any task still parked on it
    pub(crate) fn destroy_mutex(&self, id: MutexId) {
        let waiters = {
            let mut state = self.state.lock();
            let waiters = match state.mutexes.try_remove(id.0) {
                Some(mut token) => token.take_waiters(),
                None => return,
            };
            if !waiters.is_empty() {
                tracing::warn!(mutex = ?id, waiters = waiters.len(), "mutex dropped with parked tasks");
                self.cancel(&mut state, waiters.iter().map(|task| &**task));
            }
            waiters
        };

        for task in waiters {
            task.retire();
        }
    }

    pub(crate) fn create_condition(&self) -> ConditionId {
        ConditionId(self.state.lock().conditions.insert(ConditionToken::default()))
    }

    /// Free a condition slot, cancelling any task still parked on it
    pub(crate) fn destroy_condition(&self, id: ConditionId) {
        let waiters = {
            let mut state = self.state.lock();
            let waiters = match state.conditions.try_remove(id.0) {
                Some(mut token) => token.take_waiters(),
                None => return,
            };
            if !waiters.is_empty() {
                tracing::warn!(condition = ?id, waiters = waiters.len(), "condition dropped with parked tasks");
                self.cancel(&mut state, waiters.iter().map(|(task, _)| &**task));
            }
            waiters
        };

        for (task, _) in waiters {
            task.retire();
        }
    }

    pub(crate) fn mutex_owner(&self, id: MutexId) -> Option<TaskId> {
        self.state.lock().mutexes.get(id.0).and_then(MutexToken::owner)
    }

    pub(crate) fn mutex_waiters(&self, id: MutexId) -> usize {
        self.state
            .lock()
            .mutexes
            .get(id.0)
            .map_or(0, MutexToken::waiting_count)
    }

    pub(crate) fn condition_waiters(&self, id: ConditionId) -> usize {
        self.state
            .lock()
            .conditions
            .get(id.0)
            .map_or(0, ConditionToken::waiting_count)
    }

    /// Apply one system call made by `caller`
    ///
    /// `caller` is `None` only on a worker's first iteration, before it has
    /// resumed anything.
    pub(crate) fn dispatch(
        &self,
        state: &mut State,
        call: SystemCall,
        caller: Option<Box<Task>>,
    ) -> Step {
        let Some(mut caller) = caller else {
            debug_assert!(matches!(call, SystemCall::Yield), "{call:?} without a calling task");
            return Step::Reschedule;
        };
        tracing::trace!(task = %caller.id(), call = call.name(), "dispatch");

        match call {
            SystemCall::Yield => {
                self.make_ready(state, caller);
                Step::Reschedule
            }

            SystemCall::End => {
                self.count_retired(state, &caller);
                Step::Retire(caller)
            }

            SystemCall::Queue(task) => {
                Self::admit(state);
                self.make_ready(state, task);
                Step::Continue(caller)
            }

            SystemCall::QueueBlocked {
                task,
                condition,
                mutex,
            } => {
                Self::admit(state);
                if let Err(err) = self.release_mutex(state, mutex, caller.id()) {
                    caller.set_fault(err);
                }
                match state.conditions.get_mut(condition.0) {
                    Some(token) => token.park(task, mutex),
                    None => {
                        caller.set_fault(SyncError::UnknownCondition(condition));
                        self.make_ready(state, task);
                    }
                }
                Step::Continue(caller)
            }

            SystemCall::LockMutex(mutex) => {
                let id = caller.id();
                let Some(token) = state.mutexes.get_mut(mutex.0) else {
                    caller.set_fault(SyncError::UnknownMutex(mutex));
                    return Step::Continue(caller);
                };

                match token.try_acquire(id) {
                    Acquire::Granted => Step::Continue(caller),
                    Acquire::Reentrant => {
                        caller.set_fault(SyncError::AlreadyLocked { mutex, task: id });
                        Step::Continue(caller)
                    }
                    Acquire::Contended => {
                        token.park(caller);
                        Step::Reschedule
                    }
                }
            }

            SystemCall::UnlockMutex(mutex) => {
                if let Err(err) = self.release_mutex(state, mutex, caller.id()) {
                    caller.set_fault(err);
                }
                Step::Continue(caller)
            }

            SystemCall::WaitCondition { condition, mutex } => {
                if !state.conditions.contains(condition.0) {
                    caller.set_fault(SyncError::UnknownCondition(condition));
                    return Step::Continue(caller);
                }
                if let Err(err) = self.release_mutex(state, mutex, caller.id()) {
                    caller.set_fault(err);
                    return Step::Continue(caller);
                }
                state.conditions[condition.0].park(caller, mutex);
                Step::Reschedule
            }

            SystemCall::NotifyCondition { condition, count } => {
                match state.conditions.get_mut(condition.0) {
                    Some(token) => {
                        for (task, mutex) in token.take(count) {
                            self.reacquire(state, task, mutex);
                        }
                    }
                    None => caller.set_fault(SyncError::UnknownCondition(condition)),
                }
                Step::Continue(caller)
            }
        }
    }

    /// Pick the oldest ready task `worker` may run, sleeping while there is none
    ///
    /// Returns `None` once the pool is shutting down.
    pub(crate) fn next_task(
        &self,
        state: &mut MutexGuard<'_, State>,
        worker: WorkerId,
    ) -> Option<Box<Task>> {
        let bit = affinity_for(worker);
        loop {
            if state.quit {
                return None;
            }

            if let Some(index) = state.ready.iter().position(|task| task.is_eligible(worker)) {
                return state.ready.remove(index);
            }

            state.idle |= bit;
            self.wakeups[worker as usize - 1].wait(state);
            state.idle &= !bit;
        }
    }

    fn admit(state: &mut State) {
        state.live_tasks += 1;
        state.tasks_spawned += 1;
    }

    /// Append to the ready queue and wake one sleeping worker that may run it
    fn make_ready(&self, state: &mut State, task: Box<Task>) {
        let affinity = task.worker_affinity();
        state.ready.push_back(task);
        self.wake_one(state, affinity);
    }

    fn wake_one(&self, state: &mut State, affinity: WorkerAffinity) {
        let eligible = match affinity {
            ANY_WORKER => all_workers(self.num_workers),
            mask => mask,
        };

        let sleeping = state.idle & eligible;
        if sleeping != 0 {
            let index = sleeping.trailing_zeros() as usize;
            state.idle &= !(1 << index);
            self.wakeups[index].notify_one();
        }
    }

    /// Account for a task leaving the pool, quitting once none are left
    fn count_retired(&self, state: &mut State, task: &Task) {
        state.live_tasks -= 1;
        state.tasks_completed += 1;
        tracing::trace!(task = %task.id(), live = state.live_tasks, "task retired");

        if state.live_tasks == 0 {
            self.request_quit(state);
        }
    }

    /// Retire parked tasks whose token is gone; they never run again
    fn cancel<'a>(&self, state: &mut State, tasks: impl Iterator<Item = &'a Task>) {
        for task in tasks {
            tracing::debug!(task = %task.id(), "parked task cancelled");
            self.count_retired(state, task);
        }
    }

    /// Release `mutex` on behalf of `caller`, handing it to the oldest waiter
    fn release_mutex(
        &self,
        state: &mut State,
        mutex: MutexId,
        caller: TaskId,
    ) -> Result<(), SyncError> {
        let token = state
            .mutexes
            .get_mut(mutex.0)
            .ok_or(SyncError::UnknownMutex(mutex))?;
        if !token.is_owned_by(caller) {
            return Err(SyncError::NotOwner {
                mutex,
                task: caller,
            });
        }

        if let Some(next) = token.release() {
            self.make_ready(state, next);
        }
        Ok(())
    }

    /// Move a notified task toward its mutex: ready if free, else its waiter
    fn reacquire(&self, state: &mut State, task: Box<Task>, mutex: MutexId) {
        let granted = match state.mutexes.get_mut(mutex.0) {
            Some(token) => token.grant_or_park(task),
            None => {
                tracing::warn!(task = %task.id(), mutex = ?mutex, "notified task's mutex is gone");
                Some(task)
            }
        };

        if let Some(task) = granted {
            self.make_ready(state, task);
        }
    }

    fn request_quit(&self, state: &mut State) {
        state.quit = true;
        state.idle = 0;
        for wakeup in &self.wakeups {
            wakeup.notify_all();
        }
    }
}
