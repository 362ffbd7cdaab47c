// src/config/validate.rs

//! Field-level validation of a raw config.
//!
//! Structural checks that need the whole pipeline (unknown stages, cycles,
//! fan-out alignment, broadcast rules) happen later in
//! [`crate::dag::builder`], which reports them as [`crate::errors::BuildError`].

use globset::Glob;

use crate::config::model::{ConfigFile, FanOutConfig, InputConfig, RawConfigFile, ResourceConfig};
use crate::errors::{Result, StagedagError};
use crate::types::{ExecutorKind, parse_duration};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::StagedagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_stages(cfg)?;
    validate_global_config(cfg)?;
    validate_resources(cfg)?;
    validate_fan_out(cfg)?;
    validate_stage_inputs(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> StagedagError {
    StagedagError::ConfigError(msg.into())
}

fn ensure_has_stages(cfg: &RawConfigFile) -> Result<()> {
    if cfg.stage.is_empty() {
        return Err(config_error(
            "config must contain at least one [stage.<name>] section",
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pipeline.max_workers == 0 {
        return Err(config_error("[pipeline].max_workers must be >= 1 (got 0)"));
    }

    parse_duration(&cfg.executor.grace_period)
        .map_err(|e| config_error(format!("invalid [executor].grace_period: {e}")))?;

    if cfg.executor.kind == ExecutorKind::Cluster {
        match cfg.executor.launcher.as_deref() {
            Some(l) if !l.trim().is_empty() => {}
            _ => {
                return Err(config_error(
                    "[executor].launcher is required when kind = \"cluster\"",
                ));
            }
        }
    }

    Ok(())
}

fn validate_resources(cfg: &RawConfigFile) -> Result<()> {
    check_resource_config("[resources]", &cfg.resources)?;
    for (name, stage) in cfg.stage.iter() {
        let merged = stage.resources.merged_over(&cfg.resources);
        check_resource_config(&format!("[stage.{name}].resources"), &merged)?;
    }
    Ok(())
}

fn check_resource_config(section: &str, res: &ResourceConfig) -> Result<()> {
    if res.cpu == Some(0) {
        return Err(config_error(format!("{section}.cpu must be >= 1 (got 0)")));
    }
    for (field, value) in [("base_time", &res.base_time), ("per_unit_time", &res.per_unit_time)] {
        if let Some(s) = value {
            parse_duration(s)
                .map_err(|e| config_error(format!("invalid {section}.{field}: {e}")))?;
        }
    }
    if let Some(factor) = res.fast_mode_factor {
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(config_error(format!(
                "{section}.fast_mode_factor must be in (0, 1] (got {factor})"
            )));
        }
    }
    Ok(())
}

fn validate_stage_inputs(cfg: &RawConfigFile) -> Result<()> {
    for (name, stage) in cfg.stage.iter() {
        if stage.command.trim().is_empty() {
            return Err(config_error(format!("stage '{name}' has an empty command")));
        }
        for (input_name, input) in stage.inputs.iter() {
            check_input(name, input_name, input)?;
        }
        for (output_name, output) in stage.outputs.iter() {
            if output.path.trim().is_empty() {
                return Err(config_error(format!(
                    "stage '{name}' output '{output_name}' has an empty path"
                )));
            }
        }
    }
    Ok(())
}

fn check_input(stage: &str, name: &str, input: &InputConfig) -> Result<()> {
    let sources = [input.path.is_some(), input.value.is_some(), input.stage.is_some()]
        .iter()
        .filter(|set| **set)
        .count();
    if sources != 1 {
        return Err(config_error(format!(
            "stage '{stage}' input '{name}' must set exactly one of `path`, `value` or `stage`"
        )));
    }

    if input.stage.is_some() {
        if input.output.is_none() {
            return Err(config_error(format!(
                "stage '{stage}' input '{name}' consumes a stage but names no `output`"
            )));
        }
        if input.select.is_some() && input.gather {
            return Err(config_error(format!(
                "stage '{stage}' input '{name}' cannot set both `select` and `gather`"
            )));
        }
    } else if input.output.is_some() || input.select.is_some() || input.gather {
        return Err(config_error(format!(
            "stage '{stage}' input '{name}' uses `output`/`select`/`gather` without `stage`"
        )));
    }

    if input.value.is_some() && input.pattern.is_some() {
        return Err(config_error(format!(
            "stage '{stage}' input '{name}' is a literal value and cannot count files with `pattern`"
        )));
    }

    if let Some(pattern) = &input.pattern {
        check_glob(&format!("stage '{stage}' input '{name}'"), pattern)?;
    }

    Ok(())
}

fn validate_fan_out(cfg: &RawConfigFile) -> Result<()> {
    for (name, set) in cfg.fan_out.iter() {
        if let FanOutConfig::Discover { pattern, .. } = set {
            check_glob(&format!("fan-out set '{name}'"), pattern)?;
        }
    }
    Ok(())
}

fn check_glob(owner: &str, pattern: &str) -> Result<()> {
    Glob::new(pattern)
        .map(|_| ())
        .map_err(|e| config_error(format!("{owner} has an invalid pattern {pattern:?}: {e}")))
}
