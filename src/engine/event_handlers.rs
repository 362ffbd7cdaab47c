// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::dag::{Scheduler, SchedulerStep};
use crate::engine::{ProcessExit, TaskOutcome};
use crate::types::TaskId;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Prepare these tasks and launch (or reuse, or fail) them.
    DispatchTasks(Vec<TaskId>),
    /// Verify the outputs of an exited task and report its outcome.
    FinalizeTask { task: TaskId, exit: ProcessExit },
    /// Terminate every running process.
    CancelRunning,
    /// The run is over.
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Translate a scheduler step into commands.
fn commands_for(step: SchedulerStep) -> CoreStep {
    let mut commands = Vec::new();
    if !step.newly_dispatched.is_empty() {
        commands.push(CoreCommand::DispatchTasks(step.newly_dispatched));
    }
    if step.run_just_finished {
        commands.push(CoreCommand::RequestExit);
    }
    CoreStep {
        commands,
        keep_running: !step.run_just_finished,
    }
}

/// Handle the start of the run.
pub fn handle_start(scheduler: &mut Scheduler) -> CoreStep {
    commands_for(scheduler.step_start())
}

/// Handle a process exit: the shell must verify outputs before the
/// scheduler learns the outcome.
pub fn handle_task_exit(scheduler: &Scheduler, task: TaskId, exit: ProcessExit) -> CoreStep {
    if scheduler.run_state_of(&task).is_none() {
        warn!(task = %task, "exit reported for unknown task; ignoring");
        return CoreStep {
            commands: Vec::new(),
            keep_running: true,
        };
    }
    CoreStep {
        commands: vec![CoreCommand::FinalizeTask { task, exit }],
        keep_running: true,
    }
}

/// Handle a task's final outcome.
pub fn handle_task_completion(
    scheduler: &mut Scheduler,
    outcomes: &mut BTreeMap<TaskId, TaskOutcome>,
    task: TaskId,
    outcome: TaskOutcome,
) -> CoreStep {
    match &outcome {
        TaskOutcome::Succeeded { reused: true } => {
            info!(task = %task, "task outputs reused from a previous run");
        }
        TaskOutcome::Succeeded { reused: false } => {
            info!(task = %task, "task succeeded");
        }
        TaskOutcome::Failed(failure) => {
            warn!(task = %task, kind = failure.kind(), error = %failure, "task failed");
        }
    }

    let step = scheduler.step_completion(&task, outcome.is_success());
    outcomes.insert(task, outcome);
    commands_for(step)
}

/// Handle Ctrl-C: skip everything not started and stop running processes.
pub fn handle_shutdown(scheduler: &mut Scheduler) -> CoreStep {
    if scheduler.is_cancelled() {
        info!("shutdown already in progress");
        return CoreStep {
            commands: Vec::new(),
            keep_running: !scheduler.is_finished(),
        };
    }

    let step = scheduler.step_cancel();
    let mut commands = Vec::new();
    if scheduler.running_count() > 0 {
        commands.push(CoreCommand::CancelRunning);
    }
    if step.run_just_finished {
        commands.push(CoreCommand::RequestExit);
    }

    CoreStep {
        commands,
        keep_running: !step.run_just_finished,
    }
}
