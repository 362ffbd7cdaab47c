// src/estimate/mod.rs

//! Resource estimation.
//!
//! [`estimate`] is a pure function from a [`ResourcePolicy`] and a cheap
//! structural property of the inputs (how many files match the counted
//! input patterns) to a [`ResourceEstimate`]. All constants live in the
//! policy, which comes from configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::config::ResourceConfig;
use crate::errors::EstimationError;
use crate::fs::{FileSystem, list_matching};
use crate::types::{TaskId, parse_duration};

const DEFAULT_CPU: u32 = 1;
const DEFAULT_MEMORY_MB: u64 = 4096;
const DEFAULT_BASE_TIME: Duration = Duration::from_secs(10 * 60);
const DEFAULT_FAST_MODE_FACTOR: f64 = 0.5;

/// Fully resolved estimation policy for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourcePolicy {
    pub cpu: u32,
    pub memory_mb: u64,
    pub base_time: Duration,
    pub per_unit_time: Duration,
    pub fast_mode_factor: f64,
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self {
            cpu: DEFAULT_CPU,
            memory_mb: DEFAULT_MEMORY_MB,
            base_time: DEFAULT_BASE_TIME,
            per_unit_time: Duration::ZERO,
            fast_mode_factor: DEFAULT_FAST_MODE_FACTOR,
        }
    }
}

impl ResourcePolicy {
    /// Resolve a (validated) merged resource config against built-in defaults.
    pub fn from_config(cfg: &ResourceConfig) -> std::result::Result<Self, String> {
        let defaults = ResourcePolicy::default();
        let base_time = match cfg.base_time.as_deref() {
            Some(s) => parse_duration(s)?,
            None => defaults.base_time,
        };
        let per_unit_time = match cfg.per_unit_time.as_deref() {
            Some(s) => parse_duration(s)?,
            None => defaults.per_unit_time,
        };
        Ok(Self {
            cpu: cfg.cpu.unwrap_or(defaults.cpu),
            memory_mb: cfg.memory_mb.unwrap_or(defaults.memory_mb),
            base_time,
            per_unit_time,
            fast_mode_factor: cfg.fast_mode_factor.unwrap_or(defaults.fast_mode_factor),
        })
    }
}

/// CPU / memory / time budget for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceEstimate {
    pub cpu: u32,
    pub memory_mb: u64,
    pub time: Duration,
}

impl ResourceEstimate {
    /// Time rounded up to whole minutes, as cluster launchers expect.
    pub fn time_minutes(&self) -> u64 {
        self.time.as_secs().div_ceil(60).max(1)
    }
}

/// How many estimation units the task's inputs contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitCount {
    /// The task declares no counted inputs; only `base_time` applies.
    NotCounted,
    Counted(usize),
}

/// A directory input whose matching files count as units.
#[derive(Debug, Clone)]
pub struct CountedInput {
    pub dir: PathBuf,
    pub pattern: String,
}

/// Compute the estimate for `task`.
///
/// `time = base_time + per_unit_time * units`, then scaled as a whole by
/// `fast_mode_factor` when `fast_mode` is set.
pub fn estimate(
    task: &str,
    policy: &ResourcePolicy,
    units: UnitCount,
    patterns: &[String],
    fast_mode: bool,
) -> std::result::Result<ResourceEstimate, EstimationError> {
    let unit_count = match units {
        UnitCount::NotCounted => 0,
        UnitCount::Counted(0) => {
            return Err(EstimationError::NoInputsFound {
                task: task.to_string(),
                patterns: patterns.to_vec(),
            });
        }
        UnitCount::Counted(n) => n,
    };

    let per_unit = policy
        .per_unit_time
        .saturating_mul(u32::try_from(unit_count).unwrap_or(u32::MAX));
    let mut time = policy.base_time.saturating_add(per_unit);
    if fast_mode {
        let factor = policy.fast_mode_factor;
        time = match Duration::try_from_secs_f64(time.as_secs_f64() * factor) {
            Ok(scaled) => scaled.min(time),
            // Rounding near `Duration::MAX`; a factor <= 1 cannot lengthen it.
            Err(_) if factor > 0.0 && factor <= 1.0 => time,
            Err(_) => {
                return Err(EstimationError::TimeOutOfRange {
                    task: task.to_string(),
                });
            }
        };
    }

    Ok(ResourceEstimate {
        cpu: policy.cpu,
        memory_mb: policy.memory_mb,
        time,
    })
}

/// Count files matching each counted input's pattern.
///
/// Returns [`UnitCount::NotCounted`] when `inputs` is empty.
pub fn count_units(fs: &dyn FileSystem, inputs: &[CountedInput]) -> Result<UnitCount> {
    if inputs.is_empty() {
        return Ok(UnitCount::NotCounted);
    }
    let mut total = 0usize;
    for input in inputs {
        total += list_matching(fs, &input.dir, &input.pattern)?.len();
    }
    Ok(UnitCount::Counted(total))
}

/// Convenience wrapper used by the dispatcher: count, then estimate.
pub fn estimate_task(
    fs: &dyn FileSystem,
    task: &TaskId,
    policy: &ResourcePolicy,
    inputs: &[CountedInput],
    fast_mode: bool,
) -> Result<std::result::Result<ResourceEstimate, EstimationError>> {
    let units = count_units(fs, inputs)?;
    let patterns: Vec<String> = inputs
        .iter()
        .map(|i| i.dir.join(&i.pattern).display().to_string())
        .collect();
    Ok(estimate(task, policy, units, &patterns, fast_mode))
}
