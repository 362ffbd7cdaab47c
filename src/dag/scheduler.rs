// src/dag/scheduler.rs

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::graph::TaskGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::dag::task_info::{RunState, SkipCause, TaskInfo, TaskRunState};
use crate::types::TaskId;

/// Scheduler holds the immutable task graph plus mutable per-run state.
///
/// It is responsible for:
/// - deciding when a task is ready (all dependencies succeeded)
/// - bounding how many tasks run at once
/// - skipping dependents when a task fails
/// - skipping everything not yet started when the run is cancelled
///
/// It performs no IO; the engine reports completions back with
/// [`Scheduler::step_completion`].
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<TaskGraph>,
    tasks: HashMap<TaskId, TaskInfo>,
    max_workers: usize,
    cancelled: bool,
}

impl Scheduler {
    /// Every task starts `Pending`. `max_workers` is clamped to at least 1.
    pub fn new(graph: Arc<TaskGraph>, max_workers: usize) -> Self {
        let tasks = graph
            .task_ids()
            .map(|id| {
                let deps = graph.dependencies_of(id).to_vec();
                (id.clone(), TaskInfo::new(id.clone(), deps))
            })
            .collect();

        Self {
            graph,
            tasks,
            max_workers: max_workers.max(1),
            cancelled: false,
        }
    }

    pub fn graph(&self) -> &Arc<TaskGraph> {
        &self.graph
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Read-only view of the given task's state.
    pub fn run_state_of(&self, task: &str) -> Option<TaskRunState> {
        self.tasks.get(task).map(|info| info.run_state.into())
    }

    pub fn skip_cause_of(&self, task: &str) -> Option<&SkipCause> {
        self.tasks.get(task).and_then(|info| info.skip_cause.as_ref())
    }

    /// Number of tasks currently occupying a worker slot.
    pub fn running_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|i| i.run_state == RunState::Running)
            .count()
    }

    /// Whether every task reached a terminal state.
    pub fn is_finished(&self) -> bool {
        ReadOnlyStateManager::new(&self.tasks).all_tasks_terminal()
    }

    /// Whether the dependencies of `task` are satisfied. `None` if unknown.
    pub fn deps_satisfied(&self, task: &str) -> Option<bool> {
        let info = self.tasks.get(task)?;
        Some(ReadOnlyStateManager::new(&self.tasks).deps_satisfied_for_info(info))
    }

    /// Promote roots and dispatch the first batch.
    pub fn step_start(&mut self) -> SchedulerStep {
        info!(
            tasks = self.tasks.len(),
            max_workers = self.max_workers,
            "scheduler: starting run"
        );
        self.advance(Vec::new())
    }

    /// Record the outcome of a running task and dispatch what became ready.
    pub fn step_completion(&mut self, task: &str, success: bool) -> SchedulerStep {
        let Some(info) = self.tasks.get_mut(task) else {
            warn!(task = %task, "completion for unknown task; ignoring");
            return SchedulerStep::default();
        };

        if info.run_state != RunState::Running {
            warn!(
                task = %task,
                state = ?info.run_state,
                "completion for task that is not running; ignoring"
            );
            return SchedulerStep::default();
        }

        let mut newly_skipped = Vec::new();
        if success {
            info.run_state = RunState::Succeeded;
            debug!(task = %task, "task succeeded");
        } else {
            info.run_state = RunState::Failed;
            warn!(task = %task, "task failed; skipping dependents");
            let mut manager = StateManager::new(&self.graph, &mut self.tasks);
            newly_skipped = manager.mark_dependents_skipped(task);
        }

        self.advance(newly_skipped)
    }

    /// Stop dispatching and skip every task that has not started.
    ///
    /// Running tasks stay `Running` until their completion is reported.
    pub fn step_cancel(&mut self) -> SchedulerStep {
        if self.cancelled {
            return SchedulerStep::default();
        }
        self.cancelled = true;

        let mut manager = StateManager::new(&self.graph, &mut self.tasks);
        let newly_skipped = manager.skip_all_waiting();
        info!(
            skipped = newly_skipped.len(),
            running = manager.count(RunState::Running),
            "scheduler: run cancelled"
        );
        let run_just_finished = manager.all_tasks_terminal();

        SchedulerStep {
            newly_dispatched: Vec::new(),
            newly_skipped,
            run_just_finished,
        }
    }

    fn advance(&mut self, newly_skipped: Vec<TaskId>) -> SchedulerStep {
        let mut manager = StateManager::new(&self.graph, &mut self.tasks);

        let newly_dispatched = if self.cancelled {
            Vec::new()
        } else {
            manager.promote_ready();
            manager.dispatch_ready(self.max_workers)
        };

        let run_just_finished = manager.all_tasks_terminal();
        if run_just_finished {
            info!("scheduler: all tasks terminal");
        }

        SchedulerStep {
            newly_dispatched,
            newly_skipped,
            run_just_finished,
        }
    }
}
