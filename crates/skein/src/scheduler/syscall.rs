//! System calls a task hands to the scheduler when it suspends

use crate::scheduler::Task;
use crate::sync::{ConditionId, MutexId};
use std::fmt;

/// One scheduling request, produced by a task at a suspension point
pub(crate) enum SystemCall {
    /// Stay runnable, requeue behind the other ready tasks
    Yield,

    /// The task body returned; retire the task
    End,

    /// Make a new task ready; the caller continues
    Queue(Box<Task>),

    /// Release `mutex` and create `task` already parked on `condition`
    QueueBlocked {
        task: Box<Task>,
        condition: ConditionId,
        mutex: MutexId,
    },

    /// Acquire `mutex`, parking the caller while it is held elsewhere
    LockMutex(MutexId),

    /// Release `mutex`, handing it to the oldest waiter
    UnlockMutex(MutexId),

    /// Release `mutex` and park on `condition` until notified
    WaitCondition {
        condition: ConditionId,
        mutex: MutexId,
    },

    /// Wake up to `count` of the oldest waiters on `condition`
    NotifyCondition { condition: ConditionId, count: usize },
}

impl SystemCall {
    /// Short name used in trace output
    pub(crate) fn name(&self) -> &'static str {
        match self {
            SystemCall::Yield => "yield",
            SystemCall::End => "end",
            SystemCall::Queue(_) => "queue",
            SystemCall::QueueBlocked { .. } => "queue_blocked",
            SystemCall::LockMutex(_) => "lock_mutex",
            SystemCall::UnlockMutex(_) => "unlock_mutex",
            SystemCall::WaitCondition { .. } => "wait_condition",
            SystemCall::NotifyCondition { .. } => "notify_condition",
        }
    }
}

impl fmt::Debug for SystemCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemCall::Yield => f.write_str("Yield"),
            SystemCall::End => f.write_str("End"),
            SystemCall::Queue(task) => f.debug_tuple("Queue").field(&task.id()).finish(),
            SystemCall::QueueBlocked {
                task,
                condition,
                mutex,
            } => f
                .debug_struct("QueueBlocked")
                .field("task", &task.id())
                .field("condition", condition)
                .field("mutex", mutex)
                .finish(),
            SystemCall::LockMutex(mutex) => f.debug_tuple("LockMutex").field(mutex).finish(),
            SystemCall::UnlockMutex(mutex) => f.debug_tuple("UnlockMutex").field(mutex).finish(),
            SystemCall::WaitCondition { condition, mutex } => f
                .debug_struct("WaitCondition")
                .field("condition", condition)
                .field("mutex", mutex)
                .finish(),
            SystemCall::NotifyCondition { condition, count } => f
                .debug_struct("NotifyCondition")
                .field("condition", condition)
                .field("count", count)
                .finish(),
        }
    }
}
