// src/dag/state_manager.rs

//! Per-run state transitions for tasks in the scheduler.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::dag::TaskGraph;
use crate::dag::task_info::{RunState, SkipCause, TaskInfo};
use crate::types::TaskId;

/// Applies state transitions over the scheduler's task map.
pub(crate) struct StateManager<'a> {
    graph: &'a TaskGraph,
    tasks: &'a mut HashMap<TaskId, TaskInfo>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a TaskGraph, tasks: &'a mut HashMap<TaskId, TaskInfo>) -> Self {
        Self { graph, tasks }
    }

    /// Move every `Pending` task whose dependencies all succeeded to `Ready`.
    pub fn promote_ready(&mut self) {
        let candidates: Vec<TaskId> = self
            .graph
            .task_ids()
            .filter(|id| {
                self.tasks.get(*id).is_some_and(|info| {
                    info.run_state == RunState::Pending
                        && ReadOnlyStateManager::new(&*self.tasks).deps_satisfied_for_info(info)
                })
            })
            .cloned()
            .collect();

        for id in candidates {
            if let Some(info) = self.tasks.get_mut(&id) {
                info.run_state = RunState::Ready;
                debug!(task = %id, "dependencies satisfied; marking Ready");
            }
        }
    }

    /// Move `Ready` tasks to `Running` in graph order while fewer than
    /// `max_workers` tasks are running. Returns the dispatched ids.
    pub fn dispatch_ready(&mut self, max_workers: usize) -> Vec<TaskId> {
        let mut running = self.count(RunState::Running);
        let mut dispatched = Vec::new();

        for id in self.graph.task_ids() {
            if running >= max_workers {
                break;
            }
            if let Some(info) = self.tasks.get_mut(id) {
                if info.run_state == RunState::Ready {
                    info.run_state = RunState::Running;
                    running += 1;
                    info!(task = %id, "dispatching task");
                    dispatched.push(id.clone());
                }
            }
        }

        dispatched
    }

    /// Mark every waiting transitive dependent of `failed_task` as `Skipped`.
    ///
    /// Returns the newly skipped ids (excluding `failed_task`).
    pub fn mark_dependents_skipped(&mut self, failed_task: &str) -> Vec<TaskId> {
        let mut newly_skipped = Vec::new();

        for id in self.graph.transitive_dependents(failed_task) {
            if let Some(info) = self.tasks.get_mut(&id) {
                match info.run_state {
                    RunState::Pending | RunState::Ready => {
                        info.run_state = RunState::Skipped;
                        info.skip_cause = Some(SkipCause::UpstreamFailed(failed_task.to_string()));
                        debug!(
                            task = %id,
                            upstream = %failed_task,
                            "skipping dependent due to upstream failure"
                        );
                        newly_skipped.push(id);
                    }
                    RunState::Running => {
                        // Cannot happen: a running task had all deps succeed.
                        warn!(task = %id, upstream = %failed_task, "dependent of failed task is running");
                    }
                    RunState::Succeeded | RunState::Failed | RunState::Skipped => {}
                }
            }
        }

        newly_skipped
    }

    /// Skip every task that has not started yet.
    pub fn skip_all_waiting(&mut self) -> Vec<TaskId> {
        let mut newly_skipped = Vec::new();
        for id in self.graph.task_ids() {
            if let Some(info) = self.tasks.get_mut(id) {
                if matches!(info.run_state, RunState::Pending | RunState::Ready) {
                    info.run_state = RunState::Skipped;
                    info.skip_cause = Some(SkipCause::Cancelled);
                    newly_skipped.push(id.clone());
                }
            }
        }
        newly_skipped
    }

    pub fn count(&self, state: RunState) -> usize {
        self.tasks.values().filter(|i| i.run_state == state).count()
    }

    pub fn all_tasks_terminal(&self) -> bool {
        ReadOnlyStateManager::new(&*self.tasks).all_tasks_terminal()
    }
}

/// A read-only view over the task map.
pub(crate) struct ReadOnlyStateManager<'a> {
    tasks: &'a HashMap<TaskId, TaskInfo>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(tasks: &'a HashMap<TaskId, TaskInfo>) -> Self {
        Self { tasks }
    }

    /// A task's dependencies are satisfied when every one has `Succeeded`.
    pub fn deps_satisfied_for_info(&self, info: &TaskInfo) -> bool {
        info.deps.iter().all(|dep_id| match self.tasks.get(dep_id) {
            Some(dep) => dep.run_state == RunState::Succeeded,
            None => {
                warn!(task = %info.id, dep = %dep_id, "dependency missing from tasks map");
                false
            }
        })
    }

    pub fn all_tasks_terminal(&self) -> bool {
        !self.tasks.values().any(|info| {
            matches!(
                info.run_state,
                RunState::Pending | RunState::Ready | RunState::Running
            )
        })
    }
}
