// src/dag/task_info.rs

//! Per-task scheduling state and the dispatch record handed to executors.

use std::path::PathBuf;
use std::time::Duration;

use crate::estimate::ResourceEstimate;
use crate::types::TaskId;

/// Per-run state of a task (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    /// Waiting on dependencies.
    Pending,
    /// Dependencies succeeded; waiting for a worker slot.
    Ready,
    /// Handed to the dispatcher and occupying a worker slot.
    Running,
    Succeeded,
    Failed,
    /// Never started: an upstream task failed or the run was cancelled.
    Skipped,
}

/// Public, read-only view of a task's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRunState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskRunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskRunState::Succeeded | TaskRunState::Failed | TaskRunState::Skipped
        )
    }
}

impl From<RunState> for TaskRunState {
    fn from(state: RunState) -> Self {
        match state {
            RunState::Pending => TaskRunState::Pending,
            RunState::Ready => TaskRunState::Ready,
            RunState::Running => TaskRunState::Running,
            RunState::Succeeded => TaskRunState::Succeeded,
            RunState::Failed => TaskRunState::Failed,
            RunState::Skipped => TaskRunState::Skipped,
        }
    }
}

/// Why a task was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipCause {
    /// A (transitive) dependency failed; holds the failed task's id.
    UpstreamFailed(TaskId),
    Cancelled,
}

/// Scheduling information for one task.
#[derive(Debug, Clone)]
pub(crate) struct TaskInfo {
    pub id: TaskId,
    /// Direct dependencies.
    pub deps: Vec<TaskId>,
    pub run_state: RunState,
    pub skip_cause: Option<SkipCause>,
}

impl TaskInfo {
    pub fn new(id: TaskId, deps: Vec<TaskId>) -> Self {
        Self {
            id,
            deps,
            run_state: RunState::Pending,
            skip_cause: None,
        }
    }
}

/// A prepared task the executor should run now.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: TaskId,
    /// Full shell command, launcher prefix included.
    pub command: String,
    pub estimate: ResourceEstimate,
    /// stdout and stderr are appended here.
    pub log_path: PathBuf,
    /// Kill the process once `estimate.time` elapses instead of only warning.
    pub hard_timeout: bool,
    /// Time between SIGTERM and a forced kill.
    pub grace_period: Duration,
}
