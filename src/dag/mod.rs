// src/dag/mod.rs

//! Task graph construction and scheduling.
//!
//! - [`builder`] expands a pipeline definition into a [`TaskGraph`].
//! - [`graph`] holds the expanded DAG of task instances.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   tasks are ready and how many may run at once.
//! - [`task_info`] provides task states and the scheduled task type.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod builder;
pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub(crate) mod state_manager;
pub mod task_info;

pub use builder::build;
pub use graph::TaskGraph;
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use task_info::{ScheduledTask, SkipCause, TaskRunState};
