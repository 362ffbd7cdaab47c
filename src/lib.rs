// src/lib.rs

pub mod artifact;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod estimate;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod state;
pub mod task;
pub mod types;

use std::io::{self, Write};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::dag::{Scheduler, TaskGraph};
use crate::engine::{CoreRuntime, DispatchOptions, Dispatcher, Runtime, RuntimeEvent};
use crate::errors::{Result, StagedagError};
use crate::exec::{ExecutorBackend, RealExecutorBackend};
use crate::fs::{FileSystem, RealFileSystem};
use crate::output::OutputOrganizer;
use crate::pipeline::PipelineDefinition;
use crate::report::RunReport;
use crate::state::{FileFingerprintStore, FingerprintStore};
use crate::task::InputBinding;

/// A configuration resolved all the way to a task graph.
#[derive(Debug, Clone)]
pub struct PreparedPipeline {
    pub config: ConfigFile,
    pub definition: PipelineDefinition,
    pub organizer: OutputOrganizer,
    pub graph: Arc<TaskGraph>,
}

impl PreparedPipeline {
    /// Resolve fan-out sets through `fs` and build the task graph.
    pub fn from_config(config: ConfigFile, fs: &dyn FileSystem) -> Result<Self> {
        let definition = PipelineDefinition::from_config(&config, fs)?;
        let organizer = OutputOrganizer::new(
            config.pipeline.output_root.clone(),
            config.pipeline.state_dir.clone(),
        );
        let graph = dag::build(&definition, &organizer)?;
        Ok(Self {
            config,
            definition,
            organizer,
            graph: Arc::new(graph),
        })
    }
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading, CLI overrides and graph construction
/// - scheduler / dispatcher / runtime
/// - executor
/// - Ctrl-C handling
///
/// Returns whether every task succeeded.
pub async fn run(args: CliArgs) -> anyhow::Result<bool> {
    let mut cfg = load_and_validate(&args.config)?;
    apply_cli_overrides(&mut cfg, &args)?;

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let prepared = PreparedPipeline::from_config(cfg, &*fs)?;

    if args.dry_run {
        let stdout = io::stdout();
        write_dry_run(&prepared, &mut stdout.lock())?;
        debug!("dry-run complete (no execution)");
        return Ok(true);
    }

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    // Process executor backend (real implementation in production).
    let executor = RealExecutorBackend::new(rt_tx.clone());

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let fingerprints = FileFingerprintStore::new(Arc::clone(&fs), &prepared.config.pipeline.state_dir);
    let report = execute(&prepared, fs, Box::new(fingerprints), executor, rt_rx).await?;

    let stdout = io::stdout();
    report.write_summary(&mut stdout.lock())?;

    if let Some(path) = &args.report {
        std::fs::write(path, report.to_json()?)?;
        info!(path = ?path, "wrote JSON run report");
    }

    Ok(report.success)
}

/// Run a prepared pipeline against any executor backend.
///
/// `event_rx` must be the receiving end of the channel the backend reports
/// `TaskExited` events on.
pub async fn execute<E: ExecutorBackend>(
    prepared: &PreparedPipeline,
    fs: Arc<dyn FileSystem>,
    fingerprints: Box<dyn FingerprintStore>,
    executor: E,
    event_rx: mpsc::Receiver<RuntimeEvent>,
) -> Result<RunReport> {
    let options = DispatchOptions::from_config(&prepared.config)?;
    let mut dispatcher = Dispatcher::new(fs, &prepared.graph, fingerprints, options);
    dispatcher.prune_stale(&prepared.graph);

    let scheduler = Scheduler::new(Arc::clone(&prepared.graph), prepared.config.pipeline.max_workers);
    let core = CoreRuntime::new(scheduler);

    let runtime = Runtime::new(
        prepared.definition.name.clone(),
        core,
        dispatcher,
        event_rx,
        executor,
    );
    runtime.run().await
}

/// Fold command-line flags into the loaded configuration.
pub fn apply_cli_overrides(cfg: &mut ConfigFile, args: &CliArgs) -> Result<()> {
    if let Some(n) = args.max_workers {
        if n == 0 {
            return Err(StagedagError::ConfigError(
                "--max-workers must be >= 1".to_string(),
            ));
        }
        cfg.pipeline.max_workers = n;
    }
    if args.fast {
        cfg.pipeline.fast_mode = true;
    }
    if args.no_resume {
        cfg.pipeline.resume = false;
    }
    if args.hard_timeouts {
        cfg.pipeline.hard_timeouts = true;
    }
    Ok(())
}

/// Dry-run output: every task instance with its dependencies, inputs,
/// outputs and command template.
pub fn write_dry_run(prepared: &PreparedPipeline, out: &mut impl Write) -> io::Result<()> {
    let graph = &prepared.graph;
    writeln!(out, "stagedag dry-run: pipeline '{}'", prepared.definition.name)?;
    writeln!(out, "  output_root = {}", prepared.organizer.root().display())?;
    writeln!(out, "  max_workers = {}", prepared.config.pipeline.max_workers)?;
    for (set, keys) in &prepared.definition.fan_out_sets {
        writeln!(out, "  fan_out.{set} = {keys:?}")?;
    }
    writeln!(out)?;

    writeln!(out, "tasks ({}):", graph.len())?;
    for task in graph.tasks() {
        writeln!(out, "  - {}", task.id)?;
        writeln!(out, "      command: {}", task.command.source())?;
        let deps = graph.dependencies_of(&task.id);
        if !deps.is_empty() {
            writeln!(out, "      after: {deps:?}")?;
        }
        for input in &task.inputs {
            let source = match &input.binding {
                InputBinding::Value(v) => format!("value {v:?}"),
                InputBinding::Path(p) => format!("path {}", p.display()),
                InputBinding::Artifact(r) => format!("artifact {r}"),
                InputBinding::Gather(refs) => format!(
                    "gather [{}]",
                    refs.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", ")
                ),
            };
            let optional = if input.optional { " (optional)" } else { "" };
            writeln!(out, "      in {}: {source}{optional}", input.name)?;
        }
        for output in &task.outputs {
            let optional = if output.required { "" } else { " (optional)" };
            writeln!(out, "      out {}: {}{optional}", output.name, output.path.display())?;
        }
    }
    Ok(())
}
