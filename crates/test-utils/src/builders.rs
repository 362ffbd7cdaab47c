#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use stagedag::config::{
    ConfigFile, ExecutorSection, FanOutConfig, InputConfig, OutputConfig, PipelineSection,
    RawConfigFile, ResourceConfig, StageConfig,
};
use stagedag::errors::Result;
use stagedag::types::ExecutorKind;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                pipeline: PipelineSection::default(),
                executor: ExecutorSection::default(),
                resources: ResourceConfig::default(),
                fan_out: BTreeMap::new(),
                params: BTreeMap::new(),
                stage: BTreeMap::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.config.pipeline.name = name.to_string();
        self
    }

    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.pipeline.output_root = root.into();
        self
    }

    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pipeline.state_dir = dir.into();
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.pipeline.max_workers = n;
        self
    }

    pub fn resume(mut self, val: bool) -> Self {
        self.config.pipeline.resume = val;
        self
    }

    pub fn fast_mode(mut self, val: bool) -> Self {
        self.config.pipeline.fast_mode = val;
        self
    }

    /// `kind = "cluster"` with the given launcher prefix.
    pub fn cluster_launcher(mut self, prefix: &str) -> Self {
        self.config.executor.kind = ExecutorKind::Cluster;
        self.config.executor.launcher = Some(prefix.to_string());
        self
    }

    pub fn grace_period(mut self, val: &str) -> Self {
        self.config.executor.grace_period = val.to_string();
        self
    }

    pub fn default_resources(mut self, resources: ResourceConfig) -> Self {
        self.config.resources = resources;
        self
    }

    pub fn fan_out(mut self, set: &str, keys: &[&str]) -> Self {
        self.config.fan_out.insert(
            set.to_string(),
            FanOutConfig::List(keys.iter().map(|k| k.to_string()).collect()),
        );
        self
    }

    pub fn discovered_fan_out(mut self, set: &str, dir: &str, pattern: &str) -> Self {
        self.config.fan_out.insert(
            set.to_string(),
            FanOutConfig::Discover {
                dir: PathBuf::from(dir),
                pattern: pattern.to_string(),
            },
        );
        self
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.config.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_stage(mut self, name: &str, stage: StageConfig) -> Self {
        self.config.stage.insert(name.to_string(), stage);
        self
    }

    /// The unchecked form, for tests that exercise validation itself.
    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `StageConfig`.
pub struct StageConfigBuilder {
    stage: StageConfig,
}

impl StageConfigBuilder {
    pub fn new(command: &str) -> Self {
        Self {
            stage: StageConfig {
                command: command.to_string(),
                over: None,
                after: vec![],
                nesting: vec![],
                round: None,
                inputs: BTreeMap::new(),
                outputs: BTreeMap::new(),
                resources: ResourceConfig::default(),
                params: BTreeMap::new(),
            },
        }
    }

    pub fn over(mut self, set: &str) -> Self {
        self.stage.over = Some(set.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.stage.after.push(dep.to_string());
        self
    }

    pub fn nesting(mut self, segments: &[&str]) -> Self {
        self.stage.nesting = segments.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn round(mut self, round: u32) -> Self {
        self.stage.round = Some(round);
        self
    }

    pub fn input(mut self, name: &str, input: InputConfig) -> Self {
        self.stage.inputs.insert(name.to_string(), input);
        self
    }

    pub fn output(mut self, name: &str, output: OutputConfig) -> Self {
        self.stage.outputs.insert(name.to_string(), output);
        self
    }

    pub fn resources(mut self, resources: ResourceConfig) -> Self {
        self.stage.resources = resources;
        self
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.stage.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> StageConfig {
        self.stage
    }
}

/// `inputs.<name> = { path = ... }`
pub fn path_input(path: &str) -> InputConfig {
    InputConfig {
        path: Some(path.to_string()),
        ..InputConfig::default()
    }
}

/// `inputs.<name> = { value = ... }`
pub fn value_input(value: &str) -> InputConfig {
    InputConfig {
        value: Some(value.to_string()),
        ..InputConfig::default()
    }
}

/// `inputs.<name> = { stage = ..., output = ... }`
pub fn stage_input(stage: &str, output: &str) -> InputConfig {
    InputConfig {
        stage: Some(stage.to_string()),
        output: Some(output.to_string()),
        ..InputConfig::default()
    }
}

pub fn select_input(stage: &str, output: &str, key: &str) -> InputConfig {
    InputConfig {
        select: Some(key.to_string()),
        ..stage_input(stage, output)
    }
}

pub fn gather_input(stage: &str, output: &str) -> InputConfig {
    InputConfig {
        gather: true,
        ..stage_input(stage, output)
    }
}

pub fn optional(input: InputConfig) -> InputConfig {
    InputConfig {
        optional: true,
        ..input
    }
}

pub fn counted(input: InputConfig, pattern: &str) -> InputConfig {
    InputConfig {
        pattern: Some(pattern.to_string()),
        ..input
    }
}

pub fn output(path: &str) -> OutputConfig {
    OutputConfig {
        path: path.to_string(),
        required: true,
        single_use: false,
    }
}

pub fn optional_output(path: &str) -> OutputConfig {
    OutputConfig {
        required: false,
        ..output(path)
    }
}

pub fn single_use_output(path: &str) -> OutputConfig {
    OutputConfig {
        single_use: true,
        ..output(path)
    }
}

pub fn resources(cpu: u32, memory_mb: u64, base_time: &str, per_unit_time: &str) -> ResourceConfig {
    ResourceConfig {
        cpu: Some(cpu),
        memory_mb: Some(memory_mb),
        base_time: Some(base_time.to_string()),
        per_unit_time: Some(per_unit_time.to_string()),
        fast_mode_factor: None,
    }
}
