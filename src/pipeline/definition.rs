// src/pipeline/definition.rs

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use tracing::{debug, info};

use crate::config::{ConfigFile, FanOutConfig, InputConfig, StageConfig};
use crate::errors::{Result, StagedagError};
use crate::estimate::ResourcePolicy;
use crate::fs::{FileSystem, list_matching};

/// Typed pipeline model consumed by the graph builder.
///
/// Produced from a validated [`ConfigFile`] with fan-out sets resolved to
/// concrete key lists. Passed by reference; never mutated by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDefinition {
    pub name: String,
    /// Stages in definition order.
    pub stages: Vec<Stage>,
    pub fan_out_sets: BTreeMap<String, Vec<String>>,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub name: String,
    pub command: String,
    pub fan_out: FanOut,
    /// Ordering-only dependencies.
    pub after: Vec<String>,
    pub inputs: Vec<InputDecl>,
    pub outputs: Vec<OutputDecl>,
    pub nesting: Vec<String>,
    pub round: Option<u32>,
    pub resources: ResourcePolicy,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanOut {
    Single,
    /// One instance per key of the named set.
    Over(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDecl {
    pub name: String,
    pub source: InputSource,
    pub optional: bool,
    pub flag: Option<String>,
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Path(String),
    Value(String),
    Stage {
        stage: String,
        output: String,
        selection: Selection,
    },
}

/// Which instance(s) of an upstream stage an input reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Shared artifact of a single-instance upstream, or the instance with
    /// the same key when both stages fan out over the same set.
    Matching,
    /// One named instance (the tuning edge).
    Select(String),
    /// Every instance.
    Gather,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDecl {
    pub name: String,
    pub path: String,
    pub required: bool,
    pub single_use: bool,
}

impl PipelineDefinition {
    /// Resolve a validated config, discovering file-based fan-out sets
    /// through `fs`.
    pub fn from_config(cfg: &ConfigFile, fs: &dyn FileSystem) -> Result<Self> {
        let mut fan_out_sets = BTreeMap::new();
        for (name, set) in cfg.fan_out.iter() {
            let keys = resolve_fan_out(name, set, fs)?;
            debug!(set = %name, ?keys, "resolved fan-out set");
            fan_out_sets.insert(name.clone(), keys);
        }

        let stages = cfg
            .stage
            .iter()
            .map(|(name, sc)| stage_from_config(name, sc, cfg))
            .collect::<Result<Vec<_>>>()?;

        info!(
            pipeline = %cfg.pipeline.name,
            stages = stages.len(),
            fan_out_sets = fan_out_sets.len(),
            "resolved pipeline definition"
        );

        Ok(Self {
            name: cfg.pipeline.name.clone(),
            stages,
            fan_out_sets,
            params: cfg.params.clone(),
        })
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Keys a stage expands over (`[None]` for single-instance stages).
    pub fn instance_keys(&self, stage: &Stage) -> Option<Vec<Option<String>>> {
        match &stage.fan_out {
            FanOut::Single => Some(vec![None]),
            FanOut::Over(set) => self
                .fan_out_sets
                .get(set)
                .map(|keys| keys.iter().cloned().map(Some).collect()),
        }
    }
}

fn resolve_fan_out(name: &str, set: &FanOutConfig, fs: &dyn FileSystem) -> Result<Vec<String>> {
    let keys = match set {
        FanOutConfig::List(keys) => keys.clone(),
        FanOutConfig::Discover { dir, pattern } => {
            let files = list_matching(fs, dir, pattern)?;
            let mut keys: Vec<String> = files
                .iter()
                .filter_map(|p: &PathBuf| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
                .collect();
            keys.sort();
            keys.dedup();
            keys
        }
    };

    let mut seen = HashSet::new();
    for key in &keys {
        if key.trim().is_empty() {
            return Err(StagedagError::ConfigError(format!(
                "fan-out set '{name}' contains an empty key"
            )));
        }
        if !seen.insert(key.as_str()) {
            return Err(StagedagError::ConfigError(format!(
                "fan-out set '{name}' lists '{key}' more than once"
            )));
        }
    }
    Ok(keys)
}

fn stage_from_config(name: &str, sc: &StageConfig, cfg: &ConfigFile) -> Result<Stage> {
    let merged = sc.resources.merged_over(&cfg.resources);
    let resources = ResourcePolicy::from_config(&merged).map_err(|e| {
        StagedagError::ConfigError(format!("stage '{name}' resources: {e}"))
    })?;

    let inputs = sc
        .inputs
        .iter()
        .map(|(input_name, ic)| input_from_config(input_name, ic))
        .collect();

    let outputs = sc
        .outputs
        .iter()
        .map(|(output_name, oc)| OutputDecl {
            name: output_name.clone(),
            path: oc.path.clone(),
            required: oc.required,
            single_use: oc.single_use,
        })
        .collect();

    Ok(Stage {
        name: name.to_string(),
        command: sc.command.clone(),
        fan_out: match &sc.over {
            Some(set) => FanOut::Over(set.clone()),
            None => FanOut::Single,
        },
        after: sc.after.clone(),
        inputs,
        outputs,
        nesting: sc.nesting.clone(),
        round: sc.round,
        resources,
        params: sc.params.clone(),
    })
}

/// Assumes the config passed field-level validation (exactly one source).
fn input_from_config(name: &str, ic: &InputConfig) -> InputDecl {
    let source = if let Some(stage) = &ic.stage {
        let selection = match (&ic.select, ic.gather) {
            (Some(key), _) => Selection::Select(key.clone()),
            (None, true) => Selection::Gather,
            (None, false) => Selection::Matching,
        };
        InputSource::Stage {
            stage: stage.clone(),
            output: ic.output.clone().unwrap_or_default(),
            selection,
        }
    } else if let Some(value) = &ic.value {
        InputSource::Value(value.clone())
    } else {
        InputSource::Path(ic.path.clone().unwrap_or_default())
    };

    InputDecl {
        name: name.to_string(),
        source,
        optional: ic.optional,
        flag: ic.flag.clone(),
        pattern: ic.pattern.clone(),
    }
}
