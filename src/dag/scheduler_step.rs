// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::types::TaskId;

/// Structured result of a single scheduler "step".
///
/// Useful for tests that want to manually step the DAG and make assertions
/// about what changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Tasks moved to `Running` in this step, in graph order. The caller
    /// owns one worker slot per entry until it reports completion.
    pub newly_dispatched: Vec<TaskId>,
    /// Tasks newly marked `Skipped` in this step.
    pub newly_skipped: Vec<TaskId>,
    /// Whether this step left every task in a terminal state.
    pub run_just_finished: bool,
}
