//! Scheduler-private mutex and condition state
//!
//! Waiter queues own the parked tasks themselves, so a task blocked on a
//! token is held by that token and nowhere else. Both queues are FIFO.

use crate::scheduler::{Task, TaskId};
use crate::sync::MutexId;
use std::collections::VecDeque;

/// Result of a lock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Acquire {
    /// The mutex was free and now belongs to the caller
    Granted,
    /// The caller already holds the mutex
    Reentrant,
    /// Another task holds the mutex; the caller must be parked
    Contended,
}

/// Mutex state: owner plus FIFO queue of parked tasks
#[derive(Default)]
pub(crate) struct MutexToken {
    owner: Option<TaskId>,
    waiters: VecDeque<Box<Task>>,
}

impl MutexToken {
    pub(crate) fn owner(&self) -> Option<TaskId> {
        self.owner
    }

    pub(crate) fn is_owned_by(&self, task: TaskId) -> bool {
        self.owner == Some(task)
    }

    pub(crate) fn waiting_count(&self) -> usize {
        self.waiters.len()
    }

    /// Attempt to take the mutex for `task`
    pub(crate) fn try_acquire(&mut self, task: TaskId) -> Acquire {
        match self.owner {
            None => {
                self.owner = Some(task);
                Acquire::Granted
            }
            Some(owner) if owner == task => Acquire::Reentrant,
            Some(_) => Acquire::Contended,
        }
    }

    /// Append a task to the wait queue
    pub(crate) fn park(&mut self, task: Box<Task>) {
        self.waiters.push_back(task);
    }

    /// Clear ownership and hand the mutex to the oldest waiter
    ///
    /// Returns the new owner, which the caller makes ready.
    pub(crate) fn release(&mut self) -> Option<Box<Task>> {
        self.owner = None;
        let next = self.waiters.pop_front()?;
        self.owner = Some(next.id());
        Some(next)
    }

    /// Give the mutex to `task` if it is free, otherwise queue the task
    ///
    /// Returns the task when it now owns the mutex and is runnable.
    pub(crate) fn grant_or_park(&mut self, task: Box<Task>) -> Option<Box<Task>> {
        if self.owner.is_none() {
            self.owner = Some(task.id());
            Some(task)
        } else {
            self.waiters.push_back(task);
            None
        }
    }

    pub(crate) fn take_waiters(&mut self) -> VecDeque<Box<Task>> {
        std::mem::take(&mut self.waiters)
    }
}

/// Condition state: FIFO queue of parked tasks and the mutex each reacquires
#[derive(Default)]
pub(crate) struct ConditionToken {
    waiters: VecDeque<(Box<Task>, MutexId)>,
}

impl ConditionToken {
    pub(crate) fn waiting_count(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn park(&mut self, task: Box<Task>, mutex: MutexId) {
        self.waiters.push_back((task, mutex));
    }

    /// Remove up to `count` of the oldest waiters
    pub(crate) fn take(&mut self, count: usize) -> Vec<(Box<Task>, MutexId)> {
        let count = count.min(self.waiters.len());
        self.waiters.drain(..count).collect()
    }

    pub(crate) fn take_waiters(&mut self) -> VecDeque<(Box<Task>, MutexId)> {
        std::mem::take(&mut self.waiters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Context, TaskOptions};

    fn task() -> Box<Task> {
        Task::new(TaskOptions::new(), Box::new(|_: &Context| {}))
    }

    #[test]
    fn test_mutex_uncontended_lock_unlock() {
        let mut mutex = MutexToken::default();
        let owner = task();

        assert_eq!(mutex.try_acquire(owner.id()), Acquire::Granted);
        assert!(mutex.is_owned_by(owner.id()));
        assert_eq!(mutex.owner(), Some(owner.id()));

        assert!(mutex.release().is_none());
        assert_eq!(mutex.owner(), None);
    }

    #[test]
    fn test_mutex_reentrant_attempt() {
        let mut mutex = MutexToken::default();
        let owner = task();

        assert_eq!(mutex.try_acquire(owner.id()), Acquire::Granted);
        assert_eq!(mutex.try_acquire(owner.id()), Acquire::Reentrant);
        assert_eq!(mutex.waiting_count(), 0);
    }

    #[test]
    fn test_mutex_wait_queue_fifo() {
        let mut mutex = MutexToken::default();
        let task1 = task();
        let task2 = task();
        let task3 = task();
        let (id2, id3) = (task2.id(), task3.id());

        assert_eq!(mutex.try_acquire(task1.id()), Acquire::Granted);
        assert_eq!(mutex.try_acquire(id2), Acquire::Contended);
        mutex.park(task2);
        assert_eq!(mutex.try_acquire(id3), Acquire::Contended);
        mutex.park(task3);
        assert_eq!(mutex.waiting_count(), 2);

        let next = mutex.release().unwrap();
        assert_eq!(next.id(), id2);
        assert!(mutex.is_owned_by(id2));
        assert_eq!(mutex.waiting_count(), 1);

        let next = mutex.release().unwrap();
        assert_eq!(next.id(), id3);
        assert!(mutex.is_owned_by(id3));

        assert!(mutex.release().is_none());
        assert_eq!(mutex.owner(), None);
    }

    #[test]
    fn test_mutex_grant_or_park() {
        let mut mutex = MutexToken::default();
        let first = task();
        let second = task();
        let (first_id, second_id) = (first.id(), second.id());

        let granted = mutex.grant_or_park(first).unwrap();
        assert_eq!(granted.id(), first_id);
        assert!(mutex.is_owned_by(first_id));

        assert!(mutex.grant_or_park(second).is_none());
        assert_eq!(mutex.waiting_count(), 1);

        assert_eq!(mutex.release().unwrap().id(), second_id);
    }

    #[test]
    fn test_condition_take_in_arrival_order() {
        let mut condition = ConditionToken::default();
        let mutex = MutexId(7);
        let tasks: Vec<_> = (0..4).map(|_| task()).collect();
        let ids: Vec<_> = tasks.iter().map(|t| t.id()).collect();

        for t in tasks {
            condition.park(t, mutex);
        }
        assert_eq!(condition.waiting_count(), 4);

        let woken = condition.take(3);
        let woken_ids: Vec<_> = woken.iter().map(|(t, _)| t.id()).collect();
        assert_eq!(woken_ids, ids[..3]);
        assert!(woken.iter().all(|(_, m)| *m == mutex));
        assert_eq!(condition.waiting_count(), 1);

        let rest = condition.take(usize::MAX);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].0.id(), ids[3]);
        assert!(condition.take(1).is_empty());
    }
}
