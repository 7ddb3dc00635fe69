//! Skein Task Runtime
//!
//! This crate provides a cooperative M:N task scheduler:
//! - Worker pool multiplexing user-level tasks onto OS threads
//! - System-call protocol tasks use to hand control back to the scheduler
//! - Task-level mutexes and condition variables that park tasks, not threads
//! - Promises, futures and the `when_all` / `when_any` combinators
//!
//! ```ignore
//! let result = Scheduler::new()
//!     .num_workers(4)
//!     .start(|cx| {
//!         let answer = cx.spawn(|_| 42);
//!         answer.get(cx).map(|value| value - 42).unwrap_or(1)
//!     })
//!     .join();
//! assert_eq!(result.unwrap(), 0);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod future;
pub mod scheduler;
pub mod sync;

pub use config::{ConfigError, SchedulerConfig};
pub use future::{when_all, when_any, Future, FutureError, Promise, TaskError};
pub use scheduler::{
    Context, Scheduler, SchedulerStats, TaskHandle, TaskId, TaskOptions, WorkerAffinity, WorkerId,
    WorkerPhase,
};
pub use sync::{Condvar, Mutex, MutexGuard, SyncError};
