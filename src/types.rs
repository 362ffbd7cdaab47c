use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Canonical task identifier: `"<stage>"` or `"<stage>:<key>"`.
pub type TaskId = String;

/// How dispatched task processes are launched.
///
/// - `Local`: run the rendered command directly via `sh -c`.
/// - `Cluster`: prefix the command with the configured `launcher` template
///   (e.g. `srun --cpus-per-task={cpu} ...`) so the estimate becomes a
///   reservation request. Queueing and polling belong to the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Local,
    Cluster,
}

impl Default for ExecutorKind {
    fn default() -> Self {
        ExecutorKind::Local
    }
}

impl FromStr for ExecutorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(ExecutorKind::Local),
            "cluster" => Ok(ExecutorKind::Cluster),
            other => Err(format!(
                "invalid executor kind: {other} (expected \"local\" or \"cluster\")"
            )),
        }
    }
}

/// Build the task id for a stage instance.
pub fn task_id(stage: &str, key: Option<&str>) -> TaskId {
    match key {
        Some(key) => format!("{stage}:{key}"),
        None => stage.to_string(),
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"10m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };
    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}
