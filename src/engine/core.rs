// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - preparing tasks and sending them to the executor
//! - verifying outputs and persisting fingerprints
//!
//! The core is unit tested without any Tokio, channels, filesystem, or
//! processes.

use std::collections::BTreeMap;

use crate::dag::Scheduler;
use crate::engine::event_handlers::{
    CoreStep, handle_shutdown, handle_start, handle_task_completion, handle_task_exit,
};
use crate::engine::{RuntimeEvent, TaskOutcome};
use crate::types::TaskId;

/// Pure core runtime state.
///
/// Owns the scheduler and the outcome of every completed task. It has
/// **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    outcomes: BTreeMap<TaskId, TaskOutcome>,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn outcomes(&self) -> &BTreeMap<TaskId, TaskOutcome> {
        &self.outcomes
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::Start => handle_start(&mut self.scheduler),
            RuntimeEvent::TaskExited { task, exit } => {
                handle_task_exit(&self.scheduler, task, exit)
            }
            RuntimeEvent::TaskCompleted { task, outcome } => {
                handle_task_completion(&mut self.scheduler, &mut self.outcomes, task, outcome)
            }
            RuntimeEvent::ShutdownRequested => handle_shutdown(&mut self.scheduler),
        }
    }

    /// Consume the core, returning the scheduler (for final states) and the
    /// recorded outcomes.
    pub fn into_parts(self) -> (Scheduler, BTreeMap<TaskId, TaskOutcome>) {
        (self.scheduler, self.outcomes)
    }
}
