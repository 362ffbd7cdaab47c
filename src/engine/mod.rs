// src/engine/mod.rs

//! Orchestration engine for stagedag.
//!
//! This module ties together:
//! - the DAG scheduler
//! - the dispatcher that turns a ready task into a process invocation
//!   (input resolution, estimation, rendering, resume check) and
//!   verifies its outputs afterwards
//! - the main runtime event loop that reacts to:
//!   - process exits reported by the executor
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use crate::errors::TaskFailure;
use crate::types::TaskId;

/// Final outcome of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// `reused` is set when the outputs of a previous run were kept.
    Succeeded { reused: bool },
    Failed(TaskFailure),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded { .. })
    }
}

/// How a task process ended, as seen by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// The process exited (or was killed after its hard timeout).
    Exited {
        exit_code: Option<i32>,
        timed_out: bool,
    },
    /// Terminated because the run was cancelled.
    Cancelled,
    /// The process could not be started.
    LaunchFailed(String),
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        matches!(
            self,
            ProcessExit::Exited {
                exit_code: Some(0),
                timed_out: false
            }
        )
    }
}

/// Events flowing into the runtime from the executor, signal handlers and
/// the runtime itself.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Begin the run.
    Start,
    /// A task process ended.
    TaskExited { task: TaskId, exit: ProcessExit },
    /// A task reached its final outcome (after output verification, or
    /// without a process at all).
    TaskCompleted { task: TaskId, outcome: TaskOutcome },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod dispatch;
pub mod event_handlers;
pub mod runtime;

pub use core::CoreRuntime;
pub use dispatch::{DispatchOptions, Dispatcher, FingerprintJob, Prepared, Staged};
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
