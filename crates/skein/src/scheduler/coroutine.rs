//! Suspendable execution context backing a task
//!
//! Each task body runs on its own lazily spawned thread. Control passes
//! between the worker and that thread through two rendezvous channels: the
//! worker sends a [`Resume`] and blocks until the task sends back a
//! [`SystemCall`]. Exactly one side runs at any time.

use crate::scheduler::task::TaskHeader;
use crate::scheduler::{Context, Shared, SystemCall, TaskBody, WorkerId};
use crate::sync::SyncError;
use crossbeam::channel::{self, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Message that hands control to a suspended task
pub(crate) struct Resume {
    /// Worker executing the task for this slice
    pub(crate) worker_id: WorkerId,

    /// Misuse detected while dispatching the previous system call
    pub(crate) fault: Option<SyncError>,
}

/// Panic payload used to unwind a task whose scheduler side went away
pub(crate) struct ForcedUnwind;

/// Ends of the handshake owned by the task side until it is launched
struct Launch {
    body: TaskBody,
    calls: Sender<SystemCall>,
    resumes: Receiver<Resume>,
}

pub(crate) struct Coroutine {
    resumes: Sender<Resume>,
    calls: Receiver<SystemCall>,
    launch: Option<Launch>,

    /// Backing thread, once launched
    thread: Option<JoinHandle<()>>,
}

impl Coroutine {
    pub(crate) fn new(body: TaskBody) -> Self {
        let (resume_tx, resume_rx) = channel::bounded(1);
        let (call_tx, call_rx) = channel::bounded(1);

        Self {
            resumes: resume_tx,
            calls: call_rx,
            launch: Some(Launch {
                body,
                calls: call_tx,
                resumes: resume_rx,
            }),
            thread: None,
        }
    }

    pub(crate) fn is_started(&self) -> bool {
        self.launch.is_none()
    }

    /// Run the task until its next system call
    pub(crate) fn resume(
        &mut self,
        header: &Arc<TaskHeader>,
        shared: &Arc<Shared>,
        resume: Resume,
    ) -> SystemCall {
        if let Some(launch) = self.launch.take() {
            self.thread = Some(Self::spawn(launch, header.clone(), shared.clone()));
        }

        if self.resumes.send(resume).is_err() {
            tracing::error!(task = %header.id(), "task context vanished before resume");
            return SystemCall::End;
        }

        match self.calls.recv() {
            Ok(call) => call,
            Err(_) => {
                tracing::error!(task = %header.id(), "task context exited without ending");
                SystemCall::End
            }
        }
    }

    /// Close the handshake and wait for the backing thread to exit
    ///
    /// A thread still suspended in a system call unwinds first. Must not be
    /// called with the scheduler lock held.
    pub(crate) fn close(self) {
        let Self {
            resumes,
            calls,
            launch,
            thread,
        } = self;
        drop((resumes, calls, launch));

        if let Some(thread) = thread {
            thread.join().expect("Failed to join task thread");
        }
    }

    fn spawn(launch: Launch, header: Arc<TaskHeader>, shared: Arc<Shared>) -> JoinHandle<()> {
        let config = shared.config();
        let mut builder =
            thread::Builder::new().name(format!("{}-task-{}", config.thread_name, header.id().as_u64()));
        if let Some(size) = config.task_stack_size {
            builder = builder.stack_size(size);
        }

        builder
            .spawn(move || Self::run(launch, header, shared))
            .expect("Failed to spawn task thread")
    }

    fn run(launch: Launch, header: Arc<TaskHeader>, shared: Arc<Shared>) {
        let Launch {
            body,
            calls,
            resumes,
        } = launch;

        let first = match resumes.recv() {
            Ok(resume) => resume,
            Err(_) => return,
        };

        let cx = Context::new(header, shared, calls, resumes, first.worker_id);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&cx)));

        match outcome {
            Ok(()) => cx.finish(),
            Err(payload) if payload.is::<ForcedUnwind>() => {
                tracing::trace!(task = %cx.task_id(), "task unwound after its scheduler side closed");
            }
            Err(_) => {
                tracing::error!(task = %cx.task_id(), "panic escaped task body wrapper");
                cx.finish();
            }
        }
    }
}
