// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::types::ExecutorKind;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [pipeline]
/// name = "diann-tuning"
/// output_root = "results"
/// max_workers = 4
///
/// [fan_out]
/// samples = ["s1", "s2"]
///
/// [stage.library]
/// command = "diann --fasta {in:fasta} --out-lib {out:speclib}"
/// inputs.fasta = { path = "data/proteome.fasta" }
/// outputs.speclib = { path = "lib.predicted.speclib" }
///
/// [stage.quant]
/// command = "diann --lib {in:lib} --dir {in:raw} --out {out:report}"
/// over = "samples"
/// nesting = ["quant", "{sample}"]
/// inputs.lib = { stage = "library", output = "speclib" }
/// inputs.raw = { path = "data/raw/{sample}", pattern = "*.raw" }
/// outputs.report = { path = "report.parquet" }
/// ```
///
/// This is the unchecked form; [`ConfigFile`] is obtained via `TryFrom`,
/// which runs validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub executor: ExecutorSection,

    /// Default resource policy, overridden per stage.
    #[serde(default)]
    pub resources: ResourceConfig,

    /// Named fan-out sets (`[fan_out] samples = [...]`).
    #[serde(default)]
    pub fan_out: BTreeMap<String, FanOutConfig>,

    /// Global template parameters, available as `{param:KEY}`.
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// All stages from `[stage.<name>]`.
    #[serde(default)]
    pub stage: BTreeMap<String, StageConfig>,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub pipeline: PipelineSection,
    pub executor: ExecutorSection,
    pub resources: ResourceConfig,
    pub fan_out: BTreeMap<String, FanOutConfig>,
    pub params: BTreeMap<String, String>,
    pub stage: BTreeMap<String, StageConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            pipeline: raw.pipeline,
            executor: raw.executor,
            resources: raw.resources,
            fan_out: raw.fan_out,
            params: raw.params,
            stage: raw.stage,
        }
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_pipeline_name")]
    pub name: String,

    /// Root directory under which stage nesting paths are composed.
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Directory for fingerprints and task logs.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Upper bound on concurrently running task processes.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Scale time estimates by the resource policy's `fast_mode_factor`.
    #[serde(default)]
    pub fast_mode: bool,

    /// Kill tasks that exceed their time estimate instead of only warning.
    #[serde(default)]
    pub hard_timeouts: bool,

    /// Skip tasks whose fingerprint matches a previous successful run.
    #[serde(default = "default_resume")]
    pub resume: bool,
}

fn default_pipeline_name() -> String {
    "pipeline".to_string()
}

fn default_output_root() -> PathBuf {
    PathBuf::from("results")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".stagedag")
}

fn default_max_workers() -> usize {
    4
}

fn default_resume() -> bool {
    true
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            name: default_pipeline_name(),
            output_root: default_output_root(),
            state_dir: default_state_dir(),
            max_workers: default_max_workers(),
            fast_mode: false,
            hard_timeouts: false,
            resume: default_resume(),
        }
    }
}

/// `[executor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    #[serde(default)]
    pub kind: ExecutorKind,

    /// Command prefix for `kind = "cluster"`, e.g.
    /// `"srun --cpus-per-task={cpu} --mem={memory_mb}M --time={time_minutes}"`.
    #[serde(default)]
    pub launcher: Option<String>,

    /// Time between SIGTERM and a forced kill on cancellation.
    #[serde(default = "default_grace_period")]
    pub grace_period: String,
}

fn default_grace_period() -> String {
    "10s".to_string()
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            kind: ExecutorKind::default(),
            launcher: None,
            grace_period: default_grace_period(),
        }
    }
}

/// Resource policy knobs. Every field is optional so a stage can override
/// only what it needs; unset fields fall back to `[resources]`, then to the
/// built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    #[serde(default)]
    pub cpu: Option<u32>,

    #[serde(default)]
    pub memory_mb: Option<u64>,

    /// Fixed part of the time estimate (e.g. `"10m"`).
    #[serde(default)]
    pub base_time: Option<String>,

    /// Added once per counted input file (e.g. `"5m"`).
    #[serde(default)]
    pub per_unit_time: Option<String>,

    /// Multiplier applied to the whole time estimate in fast mode.
    #[serde(default)]
    pub fast_mode_factor: Option<f64>,
}

impl ResourceConfig {
    /// Overlay `self` (stage-level) on top of `defaults`.
    pub fn merged_over(&self, defaults: &ResourceConfig) -> ResourceConfig {
        ResourceConfig {
            cpu: self.cpu.or(defaults.cpu),
            memory_mb: self.memory_mb.or(defaults.memory_mb),
            base_time: self.base_time.clone().or_else(|| defaults.base_time.clone()),
            per_unit_time: self
                .per_unit_time
                .clone()
                .or_else(|| defaults.per_unit_time.clone()),
            fast_mode_factor: self.fast_mode_factor.or(defaults.fast_mode_factor),
        }
    }
}

/// A fan-out set: either listed explicitly or discovered from files.
///
/// ```toml
/// [fan_out]
/// samples = ["s1", "s2"]
/// runs = { dir = "data/raw", pattern = "*.raw" }   # ids are file stems
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FanOutConfig {
    List(Vec<String>),
    Discover { dir: PathBuf, pattern: String },
}

/// `[stage.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Command template, run via `sh -c` after placeholder rendering.
    pub command: String,

    /// Name of the fan-out set to expand over; single instance if absent.
    #[serde(default)]
    pub over: Option<String>,

    /// Ordering-only dependencies on other stages.
    #[serde(default)]
    pub after: Vec<String>,

    /// Output subpath segments under `pipeline.output_root`.
    #[serde(default)]
    pub nesting: Vec<String>,

    /// Optional round number; edges may not point from a later round into
    /// an earlier one.
    #[serde(default)]
    pub round: Option<u32>,

    #[serde(default)]
    pub inputs: BTreeMap<String, InputConfig>,

    #[serde(default)]
    pub outputs: BTreeMap<String, OutputConfig>,

    #[serde(default)]
    pub resources: ResourceConfig,

    /// Stage-local template parameters, shadowing `[params]`.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// `inputs.<name>` entry. Exactly one of `path`, `value`, `stage` must be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// Literal filesystem path (may contain `{sample}`).
    #[serde(default)]
    pub path: Option<String>,

    /// Literal string value.
    #[serde(default)]
    pub value: Option<String>,

    /// Upstream stage whose output this input consumes.
    #[serde(default)]
    pub stage: Option<String>,

    /// Output name on the upstream stage.
    #[serde(default)]
    pub output: Option<String>,

    /// Consume one specific fan-out instance of the upstream stage.
    #[serde(default)]
    pub select: Option<String>,

    /// Consume every fan-out instance of the upstream stage.
    #[serde(default)]
    pub gather: bool,

    /// Glob for files inside this input directory; matches are counted as
    /// estimation units.
    #[serde(default)]
    pub pattern: Option<String>,

    /// Absent input is tolerated (placeholder renders empty).
    #[serde(default)]
    pub optional: bool,

    /// Flag emitted before the path by `{arg:NAME}`.
    #[serde(default)]
    pub flag: Option<String>,
}

/// `outputs.<name>` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Path relative to the task's output directory (may contain `{sample}`).
    pub path: String,

    #[serde(default = "default_required")]
    pub required: bool,

    /// Declares that at most one downstream task may consume this output.
    #[serde(default)]
    pub single_use: bool,
}

fn default_required() -> bool {
    true
}
