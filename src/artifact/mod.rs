// src/artifact/mod.rs

//! Artifacts: named task outputs and their consumption rules.
//!
//! - [`ArtifactRef`] names one output of one task instance.
//! - [`ArtifactSpec`] is the static description the graph builder derives
//!   (producer, path, required, inferred [`ConsumptionMode`]).
//! - [`store::ArtifactStore`] tracks what has actually been published during
//!   a run and hands paths to consumers.

use std::fmt;
use std::path::PathBuf;

use crate::types::TaskId;

pub mod store;

pub use store::{ArtifactState, ArtifactStore, PublishReport};

/// Reference to output `output` of task `task`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactRef {
    pub task: TaskId,
    pub output: String,
}

impl ArtifactRef {
    pub fn new(task: impl Into<TaskId>, output: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.task, self.output)
    }
}

/// Whether reading an artifact exhausts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionMode {
    /// Any number of dependents may read it.
    Broadcast,
    /// The first dependent consumes it.
    SingleUse,
}

/// Static description of an artifact, as inferred by the graph builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    pub producer: TaskId,
    pub output: String,
    pub path: PathBuf,
    pub required: bool,
    pub mode: ConsumptionMode,
    /// Tasks that reference this artifact, in graph order.
    pub consumers: Vec<TaskId>,
}
