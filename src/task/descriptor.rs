// src/task/descriptor.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::artifact::ArtifactRef;
use crate::estimate::ResourcePolicy;
use crate::task::template::CommandTemplate;
use crate::types::TaskId;

/// One unit of work: a stage instance with its inputs and outputs resolved
/// to concrete artifact references and paths.
///
/// Built once by the graph builder and shared as `Arc<TaskDescriptor>`;
/// never mutated afterwards.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub stage: String,
    /// Fan-out key (e.g. sample id); `None` for single-instance stages.
    pub key: Option<String>,
    /// Shared by every instance of the stage.
    pub command: Arc<CommandTemplate>,
    pub inputs: Vec<TaskInput>,
    pub outputs: Vec<TaskOutput>,
    pub resources: ResourcePolicy,
    pub output_dir: PathBuf,
    pub log_path: PathBuf,
    /// Global params overlaid with stage params.
    pub params: BTreeMap<String, String>,
}

impl TaskDescriptor {
    /// Every artifact this task reads, in input order.
    pub fn artifact_refs(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.inputs.iter().flat_map(|input| match &input.binding {
            InputBinding::Artifact(r) => std::slice::from_ref(r),
            InputBinding::Gather(refs) => refs.as_slice(),
            InputBinding::Value(_) | InputBinding::Path(_) => &[][..],
        })
    }

    pub fn output(&self, name: &str) -> Option<&TaskOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn input(&self, name: &str) -> Option<&TaskInput> {
        self.inputs.iter().find(|i| i.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInput {
    pub name: String,
    pub binding: InputBinding,
    /// Absence is tolerated instead of failing the task.
    pub optional: bool,
    /// Rendered before the value by `{arg:NAME}`.
    pub flag: Option<String>,
    /// Glob inside the input directory whose matches count as units.
    pub pattern: Option<String>,
}

/// Where an input's value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputBinding {
    Value(String),
    Path(PathBuf),
    Artifact(ArtifactRef),
    Gather(Vec<ArtifactRef>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutput {
    pub name: String,
    pub path: PathBuf,
    pub required: bool,
}

/// Input after resolution against the artifact store and filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedInput {
    /// Optional input that is not available.
    Absent,
    Value(String),
    Paths(Vec<PathBuf>),
}

/// Resolved inputs keyed by input name.
pub type ResolvedInputs = BTreeMap<String, ResolvedInput>;
