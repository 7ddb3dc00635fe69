//! Single-assignment results between tasks
//!
//! A [`Promise`] stores one value (or the panic of the task producing it) and
//! its [`Future`] hands it out. Waiting parks the task on a task-level mutex
//! and condition pair, so a waiting task never occupies a worker.

mod combinators;
mod promise;

pub use combinators::{when_all, when_any};
pub use promise::{Future, Promise};

use std::any::Any;
use std::fmt;

/// Failure of the task that was to produce a value
#[derive(thiserror::Error)]
pub enum TaskError {
    /// The task body panicked; holds the original payload
    #[error("task panicked: {}", panic_message(.0.as_ref()).unwrap_or("<non-string payload>"))]
    Panicked(Box<dyn Any + Send + 'static>),
}

impl TaskError {
    /// The panic message, when the payload is a string
    pub fn message(&self) -> Option<&str> {
        match self {
            TaskError::Panicked(payload) => panic_message(payload.as_ref()),
        }
    }

    /// Take the panic payload, e.g. to downcast it or resume unwinding
    pub fn into_panic(self) -> Box<dyn Any + Send + 'static> {
        match self {
            TaskError::Panicked(payload) => payload,
        }
    }
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => f.debug_tuple("Panicked").field(&message).finish(),
            None => f.debug_tuple("Panicked").field(&format_args!("..")).finish(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> Option<&str> {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
}

/// Misuse of a promise or future
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FutureError {
    /// A value or panic was already stored
    #[error("promise already satisfied")]
    AlreadySatisfied,

    /// The future was already handed out
    #[error("future already retrieved")]
    AlreadyRetrieved,
}
