// src/dag/builder.rs

//! Expand a [`PipelineDefinition`] into a [`TaskGraph`].
//!
//! Stages are visited in topological order of the stage graph (ties broken
//! by stage name) and each is expanded over its fan-out set in set
//! order, so building the same definition twice yields the same ids, order
//! and edges. Every check runs before anything is executed; the first
//! violation aborts the build.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, info};

use crate::artifact::{ArtifactRef, ArtifactSpec, ConsumptionMode};
use crate::dag::graph::TaskGraph;
use crate::errors::BuildError;
use crate::output::OutputOrganizer;
use crate::pipeline::{FanOut, InputSource, PipelineDefinition, Selection, Stage};
use crate::task::{CommandTemplate, InputBinding, Placeholder, TaskDescriptor, TaskInput, TaskOutput};
use crate::types::{TaskId, task_id};

const SAMPLE_MARKER: &str = "{sample}";

pub fn build(def: &PipelineDefinition, organizer: &OutputOrganizer) -> Result<TaskGraph, BuildError> {
    for stage in &def.stages {
        check_stage(def, stage)?;
    }

    let order = stage_order(def)?;
    check_rounds(def)?;

    let mut templates: HashMap<&str, Arc<CommandTemplate>> = HashMap::new();
    for stage in &def.stages {
        templates.insert(stage.name.as_str(), Arc::new(check_template(def, stage)?));
    }

    let mut tasks: Vec<(Arc<TaskDescriptor>, Vec<TaskId>)> = Vec::new();
    for stage_name in order {
        let Some(stage) = def.stage(stage_name) else {
            continue;
        };
        let Some(template) = templates.get(stage_name) else {
            continue;
        };
        for key in keys_of(def, stage)? {
            tasks.push(expand_instance(def, organizer, stage, key.as_deref(), template)?);
        }
    }

    check_output_collisions(&tasks)?;
    let artifacts = artifact_specs(def, &tasks)?;

    let graph = TaskGraph::from_parts(tasks, artifacts);
    info!(
        pipeline = %def.name,
        tasks = graph.len(),
        artifacts = graph.artifact_specs().len(),
        "built task graph"
    );
    Ok(graph)
}

fn keys_of(def: &PipelineDefinition, stage: &Stage) -> Result<Vec<Option<String>>, BuildError> {
    match &stage.fan_out {
        FanOut::Single => Ok(vec![None]),
        FanOut::Over(set) => {
            let keys = def
                .fan_out_sets
                .get(set)
                .ok_or_else(|| BuildError::UnknownFanOutSet {
                    stage: stage.name.clone(),
                    set: set.clone(),
                })?;
            if keys.is_empty() {
                return Err(BuildError::EmptyFanOut {
                    stage: stage.name.clone(),
                    set: set.clone(),
                });
            }
            Ok(keys.iter().cloned().map(Some).collect())
        }
    }
}

fn upstream<'a>(def: &'a PipelineDefinition, stage: &Stage, target: &str) -> Result<&'a Stage, BuildError> {
    def.stage(target).ok_or_else(|| BuildError::UnknownStage {
        stage: stage.name.clone(),
        target: target.to_string(),
    })
}

/// Reference checks that only need the definition.
fn check_stage(def: &PipelineDefinition, stage: &Stage) -> Result<(), BuildError> {
    keys_of(def, stage)?;

    for target in &stage.after {
        upstream(def, stage, target)?;
    }

    for input in &stage.inputs {
        match &input.source {
            InputSource::Path(path) | InputSource::Value(path) => {
                if path.contains(SAMPLE_MARKER) && stage.fan_out == FanOut::Single {
                    return Err(BuildError::MalformedStage {
                        stage: stage.name.clone(),
                        reason: format!(
                            "input '{}' uses {SAMPLE_MARKER} but the stage does not fan out",
                            input.name
                        ),
                    });
                }
            }
            InputSource::Stage {
                stage: up_name,
                output,
                selection,
            } => {
                let up = upstream(def, stage, up_name)?;
                if !up.outputs.iter().any(|o| &o.name == output) {
                    return Err(BuildError::UnknownOutput {
                        stage: stage.name.clone(),
                        input: input.name.clone(),
                        upstream: up_name.clone(),
                        output: output.clone(),
                    });
                }
                match selection {
                    Selection::Matching => check_alignment(stage, up)?,
                    Selection::Select(key) => {
                        let known = match &up.fan_out {
                            FanOut::Over(set) => def
                                .fan_out_sets
                                .get(set)
                                .is_some_and(|keys| keys.contains(key)),
                            FanOut::Single => false,
                        };
                        if !known {
                            return Err(BuildError::UnknownFanOutKey {
                                stage: stage.name.clone(),
                                input: input.name.clone(),
                                upstream: up_name.clone(),
                                key: key.clone(),
                            });
                        }
                    }
                    Selection::Gather => {}
                }
            }
        }
    }
    Ok(())
}

fn check_alignment(stage: &Stage, up: &Stage) -> Result<(), BuildError> {
    match (&stage.fan_out, &up.fan_out) {
        (_, FanOut::Single) => Ok(()),
        (FanOut::Over(a), FanOut::Over(b)) if a == b => Ok(()),
        (FanOut::Over(a), FanOut::Over(b)) => Err(BuildError::MisalignedFanOut {
            stage: stage.name.clone(),
            upstream: up.name.clone(),
            reason: format!("fan-out sets differ ('{a}' vs '{b}'); use select or gather"),
        }),
        (FanOut::Single, FanOut::Over(b)) => Err(BuildError::MisalignedFanOut {
            stage: stage.name.clone(),
            upstream: up.name.clone(),
            reason: format!("upstream fans out over '{b}'; use select or gather"),
        }),
    }
}

/// Upstream stage names of `stage`, data and ordering edges combined.
fn stage_deps(stage: &Stage) -> impl Iterator<Item = &str> {
    stage
        .inputs
        .iter()
        .filter_map(|i| match &i.source {
            InputSource::Stage { stage, .. } => Some(stage.as_str()),
            InputSource::Path(_) | InputSource::Value(_) => None,
        })
        .chain(stage.after.iter().map(|s| s.as_str()))
}

fn stage_order(def: &PipelineDefinition) -> Result<Vec<&str>, BuildError> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for stage in &def.stages {
        graph.add_node(stage.name.as_str());
    }

    for stage in &def.stages {
        for dep in stage_deps(stage) {
            graph.add_edge(dep, stage.name.as_str(), ());
        }
    }

    // A topological sort will fail if there is a cycle (self-edges included).
    toposort(&graph, None).map_err(|cycle| BuildError::Cycle(cycle.node_id().to_string()))?;

    // Stable order: the first stage by name whose upstreams are placed.
    let mut placed: HashSet<&str> = HashSet::new();
    let mut order = Vec::with_capacity(def.stages.len());
    loop {
        let next = def.stages.iter().find(|s| {
            !placed.contains(s.name.as_str()) && stage_deps(s).all(|d| placed.contains(d))
        });
        let Some(stage) = next else {
            break;
        };
        placed.insert(stage.name.as_str());
        order.push(stage.name.as_str());
    }
    Ok(order)
}

fn check_rounds(def: &PipelineDefinition) -> Result<(), BuildError> {
    for stage in &def.stages {
        let Some(round) = stage.round else {
            continue;
        };
        for dep in stage_deps(stage) {
            if let Some(upstream_round) = def.stage(dep).and_then(|s| s.round) {
                if upstream_round > round {
                    return Err(BuildError::RoundOrder {
                        stage: stage.name.clone(),
                        round,
                        upstream: dep.to_string(),
                        upstream_round,
                    });
                }
            }
        }
    }
    Ok(())
}

fn merged_params(def: &PipelineDefinition, stage: &Stage) -> BTreeMap<String, String> {
    let mut params = def.params.clone();
    params.extend(stage.params.iter().map(|(k, v)| (k.clone(), v.clone())));
    params
}

fn check_template(def: &PipelineDefinition, stage: &Stage) -> Result<CommandTemplate, BuildError> {
    let malformed = |reason: String| BuildError::MalformedStage {
        stage: stage.name.clone(),
        reason,
    };

    let template = CommandTemplate::parse(&stage.command).map_err(&malformed)?;
    let params = merged_params(def, stage);

    for placeholder in template.placeholders() {
        let known = match placeholder {
            Placeholder::Input(name) | Placeholder::Arg(name) => {
                stage.inputs.iter().any(|i| &i.name == name)
            }
            Placeholder::Output(name) => stage.outputs.iter().any(|o| &o.name == name),
            Placeholder::Param(key) => params.contains_key(key),
            _ => true,
        };
        if !known {
            return Err(malformed(format!(
                "command uses {placeholder}, which the stage does not declare"
            )));
        }
    }
    Ok(template)
}

/// Task id of the upstream instance a `Matching` input or `after` edge
/// points to from instance `key`.
fn aligned_instances(def: &PipelineDefinition, stage: &Stage, up: &Stage, key: Option<&str>) -> Vec<TaskId> {
    match (&stage.fan_out, &up.fan_out) {
        (_, FanOut::Single) => vec![task_id(&up.name, None)],
        (FanOut::Over(a), FanOut::Over(b)) if a == b => vec![task_id(&up.name, key)],
        _ => all_instances(def, up),
    }
}

fn all_instances(def: &PipelineDefinition, stage: &Stage) -> Vec<TaskId> {
    def.instance_keys(stage)
        .unwrap_or_default()
        .iter()
        .map(|k| task_id(&stage.name, k.as_deref()))
        .collect()
}

fn substitute_sample(s: &str, key: Option<&str>) -> String {
    match key {
        Some(key) => s.replace(SAMPLE_MARKER, key),
        None => s.to_string(),
    }
}

fn expand_instance(
    def: &PipelineDefinition,
    organizer: &OutputOrganizer,
    stage: &Stage,
    key: Option<&str>,
    template: &Arc<CommandTemplate>,
) -> Result<(Arc<TaskDescriptor>, Vec<TaskId>), BuildError> {
    let id = task_id(&stage.name, key);
    let mut deps: Vec<TaskId> = Vec::new();

    let mut inputs = Vec::with_capacity(stage.inputs.len());
    for decl in &stage.inputs {
        let binding = match &decl.source {
            InputSource::Value(v) => InputBinding::Value(substitute_sample(v, key)),
            InputSource::Path(p) => InputBinding::Path(PathBuf::from(substitute_sample(p, key))),
            InputSource::Stage {
                stage: up_name,
                output,
                selection,
            } => {
                let up = upstream(def, stage, up_name)?;
                let producers = match selection {
                    Selection::Matching => aligned_instances(def, stage, up, key),
                    Selection::Select(k) => vec![task_id(up_name, Some(k))],
                    Selection::Gather => all_instances(def, up),
                };
                let refs: Vec<ArtifactRef> = producers
                    .iter()
                    .map(|p| ArtifactRef::new(p.clone(), output.clone()))
                    .collect();
                for p in producers {
                    push_dep(&mut deps, p);
                }
                match selection {
                    Selection::Gather => InputBinding::Gather(refs),
                    Selection::Matching | Selection::Select(_) => match refs.into_iter().next() {
                        Some(r) => InputBinding::Artifact(r),
                        None => InputBinding::Gather(Vec::new()),
                    },
                }
            }
        };
        inputs.push(TaskInput {
            name: decl.name.clone(),
            binding,
            optional: decl.optional,
            flag: decl.flag.clone(),
            pattern: decl.pattern.clone(),
        });
    }

    for target in &stage.after {
        let up = upstream(def, stage, target)?;
        for dep in aligned_instances(def, stage, up, key) {
            push_dep(&mut deps, dep);
        }
    }

    let outputs = stage
        .outputs
        .iter()
        .map(|o| TaskOutput {
            name: o.name.clone(),
            path: organizer.path_for(&stage.name, key, &o.path, &stage.nesting),
            required: o.required,
        })
        .collect();

    let task = TaskDescriptor {
        id: id.clone(),
        stage: stage.name.clone(),
        key: key.map(str::to_string),
        command: Arc::clone(template),
        inputs,
        outputs,
        resources: stage.resources.clone(),
        output_dir: organizer.task_dir(&stage.name, key, &stage.nesting),
        log_path: organizer.log_path_for(&stage.name, key),
        params: merged_params(def, stage),
    };

    debug!(task = %id, deps = ?deps, "expanded task instance");
    Ok((Arc::new(task), deps))
}

fn push_dep(deps: &mut Vec<TaskId>, dep: TaskId) {
    if !deps.contains(&dep) {
        deps.push(dep);
    }
}

fn check_output_collisions(tasks: &[(Arc<TaskDescriptor>, Vec<TaskId>)]) -> Result<(), BuildError> {
    let mut owners: HashMap<&PathBuf, &TaskId> = HashMap::new();
    for (task, _) in tasks {
        for output in &task.outputs {
            if let Some(first) = owners.insert(&output.path, &task.id) {
                return Err(BuildError::OutputCollision {
                    path: output.path.clone(),
                    first: first.clone(),
                    second: task.id.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Derive one [`ArtifactSpec`] per task output and infer its consumption
/// mode from the number of distinct consuming tasks.
fn artifact_specs(
    def: &PipelineDefinition,
    tasks: &[(Arc<TaskDescriptor>, Vec<TaskId>)],
) -> Result<BTreeMap<ArtifactRef, ArtifactSpec>, BuildError> {
    let mut consumers: HashMap<ArtifactRef, Vec<TaskId>> = HashMap::new();
    for (task, _) in tasks {
        let mut seen: HashSet<&ArtifactRef> = HashSet::new();
        for r in task.artifact_refs() {
            if seen.insert(r) {
                consumers.entry(r.clone()).or_default().push(task.id.clone());
            }
        }
    }

    let mut specs = BTreeMap::new();
    for (task, _) in tasks {
        let Some(stage) = def.stage(&task.stage) else {
            continue;
        };
        for output in &task.outputs {
            let r = ArtifactRef::new(task.id.clone(), output.name.clone());
            let readers = consumers.remove(&r).unwrap_or_default();
            let single_use = stage
                .outputs
                .iter()
                .any(|o| o.name == output.name && o.single_use);

            if single_use && readers.len() > 1 {
                return Err(BuildError::BroadcastViolation {
                    producer: task.id.clone(),
                    output: output.name.clone(),
                    consumers: readers,
                });
            }

            let mode = if readers.len() > 1 {
                ConsumptionMode::Broadcast
            } else {
                ConsumptionMode::SingleUse
            };
            specs.insert(
                r,
                ArtifactSpec {
                    producer: task.id.clone(),
                    output: output.name.clone(),
                    path: output.path.clone(),
                    required: output.required,
                    mode,
                    consumers: readers,
                },
            );
        }
    }
    Ok(specs)
}
