// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `stagedag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stagedag",
    version,
    about = "Run multi-stage pipelines of external programs as a dependency-aware DAG.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Stagedag.toml")]
    pub config: PathBuf,

    /// Resolve and validate the pipeline, print the task graph, run nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STAGEDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Override `pipeline.max_workers`.
    #[arg(long, value_name = "N")]
    pub max_workers: Option<usize>,

    /// Scale time estimates by each stage's `fast_mode_factor`.
    #[arg(long)]
    pub fast: bool,

    /// Ignore stored fingerprints and run every task.
    #[arg(long)]
    pub no_resume: bool,

    /// Kill tasks that exceed their time estimate.
    #[arg(long)]
    pub hard_timeouts: bool,

    /// Also write the run report as JSON to this path.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
