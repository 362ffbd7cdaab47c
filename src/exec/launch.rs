// src/exec/launch.rs

//! How a rendered task command becomes the command line actually run.

use crate::config::ExecutorSection;
use crate::estimate::ResourceEstimate;
use crate::task::TaskDescriptor;
use crate::task::template::shell_quote;
use crate::types::ExecutorKind;

/// Direct execution or wrapping in a cluster launcher prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchStrategy {
    Direct,
    /// Launcher template with `{cpu}`, `{memory_mb}`, `{time_minutes}`,
    /// `{task}` and `{stage}` placeholders.
    Launcher(String),
}

impl LaunchStrategy {
    /// Validation guarantees a launcher for `kind = "cluster"`; a missing one
    /// degrades to direct execution.
    pub fn from_config(section: &ExecutorSection) -> Self {
        match (section.kind, &section.launcher) {
            (ExecutorKind::Cluster, Some(launcher)) => LaunchStrategy::Launcher(launcher.clone()),
            _ => LaunchStrategy::Direct,
        }
    }

    /// Full command line for `task`.
    ///
    /// With a launcher the estimate becomes the reservation request and the
    /// task command runs under `sh -c` inside the allocation:
    /// `srun --cpus-per-task=4 --mem=8192M --time=30 sh -c '<command>'`.
    pub fn wrap(&self, task: &TaskDescriptor, command: &str, estimate: &ResourceEstimate) -> String {
        match self {
            LaunchStrategy::Direct => command.to_string(),
            LaunchStrategy::Launcher(template) => {
                let prefix = template
                    .replace("{cpu}", &estimate.cpu.to_string())
                    .replace("{memory_mb}", &estimate.memory_mb.to_string())
                    .replace("{time_minutes}", &estimate.time_minutes().to_string())
                    .replace("{task}", &shell_quote(&task.id))
                    .replace("{stage}", &shell_quote(&task.stage));
                format!("{} sh -c {}", prefix.trim_end(), shell_quote(command))
            }
        }
    }
}
