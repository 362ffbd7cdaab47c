// src/errors.rs

//! Crate-wide error types.
//!
//! - [`StagedagError`] is what the public entry points return.
//! - [`BuildError`] covers everything detected while turning a pipeline
//!   definition into a task graph; nothing runs when one is raised.
//! - [`TaskFailure`] is scoped to a single task and ends up in the run report.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::TaskId;

#[derive(Error, Debug)]
pub enum StagedagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StagedagError>;

/// Graph construction errors. Fatal for the whole run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("cycle detected in stage graph involving stage '{0}'")]
    Cycle(String),

    #[error("stage '{stage}' references unknown stage '{target}'")]
    UnknownStage { stage: String, target: String },

    #[error("stage '{stage}' input '{input}' references unknown output '{output}' of stage '{upstream}'")]
    UnknownOutput {
        stage: String,
        input: String,
        upstream: String,
        output: String,
    },

    #[error("stage '{stage}' fans out over unknown set '{set}'")]
    UnknownFanOutSet { stage: String, set: String },

    #[error("fan-out set '{set}' used by stage '{stage}' is empty")]
    EmptyFanOut { stage: String, set: String },

    #[error("stage '{stage}' input '{input}' selects '{key}', which is not in the fan-out set of stage '{upstream}'")]
    UnknownFanOutKey {
        stage: String,
        input: String,
        upstream: String,
        key: String,
    },

    #[error("stage '{stage}' cannot consume stage '{upstream}': {reason}")]
    MisalignedFanOut {
        stage: String,
        upstream: String,
        reason: String,
    },

    #[error("stage '{stage}' is malformed: {reason}")]
    MalformedStage { stage: String, reason: String },

    #[error("stage '{stage}' (round {round}) depends on stage '{upstream}' from later round {upstream_round}")]
    RoundOrder {
        stage: String,
        round: u32,
        upstream: String,
        upstream_round: u32,
    },

    #[error("output path {path:?} is produced by both '{first}' and '{second}'")]
    OutputCollision {
        path: PathBuf,
        first: TaskId,
        second: TaskId,
    },

    #[error("single-use output '{output}' of task '{producer}' is referenced by {consumers:?}")]
    BroadcastViolation {
        producer: TaskId,
        output: String,
        consumers: Vec<TaskId>,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EstimationError {
    #[error("no inputs found for task '{task}' (patterns: {patterns:?})")]
    NoInputsFound { task: TaskId, patterns: Vec<String> },

    #[error("time estimate for task '{task}' is out of range")]
    TimeOutOfRange { task: TaskId },
}

/// Why an input could not be handed to a consumer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("artifact '{0}' not found")]
    NotFound(String),

    #[error("single-use artifact '{artifact}' already consumed by '{consumer}'")]
    AlreadyConsumed { artifact: String, consumer: TaskId },

    #[error("input path {0:?} does not exist")]
    MissingPath(PathBuf),
}

/// Exit code 0, but declared required outputs are missing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("task '{task}' exited successfully but did not produce required outputs {missing:?}")]
pub struct ArtifactContractError {
    pub task: TaskId,
    pub missing: Vec<String>,
}

/// Per-task failure recorded in the run report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    #[error(transparent)]
    Estimation(#[from] EstimationError),

    #[error("input '{input}' unavailable: {source}")]
    Input {
        input: String,
        #[source]
        source: ResolveError,
    },

    #[error("external program failed (exit code {exit_code:?}, timed out: {timed_out})")]
    Execution {
        exit_code: Option<i32>,
        timed_out: bool,
    },

    #[error(transparent)]
    ArtifactContract(#[from] ArtifactContractError),

    #[error("failed to launch: {0}")]
    Launch(String),

    #[error("cancelled")]
    Cancelled,
}

impl TaskFailure {
    /// Stable error-kind label used in logs and the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskFailure::Estimation(_) => "EstimationError",
            TaskFailure::Input { .. } => "InputError",
            TaskFailure::Execution { .. } => "ExecutionError",
            TaskFailure::ArtifactContract(_) => "ArtifactContractError",
            TaskFailure::Launch(_) => "LaunchError",
            TaskFailure::Cancelled => "Cancelled",
        }
    }
}
