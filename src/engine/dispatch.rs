// src/engine/dispatch.rs

//! Turning a ready task into a process invocation, and a finished process
//! into a task outcome.
//!
//! [`Dispatcher::prepare`] runs when the scheduler hands out a worker slot:
//!
//! 1. resolve every input (artifact store for upstream outputs, filesystem
//!    for literal paths); optional inputs that are unavailable become absent
//! 2. estimate resources from the counted inputs
//! 3. render the command template
//! 4. fingerprint the command and input contents; if resume is enabled and
//!    the fingerprint matches the last successful run and the outputs are
//!    still there, reuse them
//! 5. otherwise create output directories and hand a [`ScheduledTask`] to
//!    the executor
//!
//! Steps 1-3 are [`Dispatcher::stage`]. Step 4 reads whole input trees, so
//! the runtime runs the returned [`FingerprintJob`] on a blocking thread and
//! passes its result to [`Dispatcher::complete`] for step 5.
//!
//! [`Dispatcher::finalize`] publishes the outputs of a successful process
//! and keeps the fingerprint store in sync.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::artifact::ArtifactStore;
use crate::config::ConfigFile;
use crate::dag::{ScheduledTask, TaskGraph};
use crate::engine::{ProcessExit, TaskOutcome};
use crate::errors::{ResolveError, Result, StagedagError, TaskFailure};
use crate::estimate::{CountedInput, ResourceEstimate, estimate_task};
use crate::exec::LaunchStrategy;
use crate::fs::FileSystem;
use crate::state::FingerprintStore;
use crate::task::fingerprint::task_fingerprint;
use crate::task::{InputBinding, RenderContext, ResolvedInput, ResolvedInputs, TaskDescriptor, TaskInput};
use crate::types::{TaskId, parse_duration};

/// Per-run dispatch settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOptions {
    pub fast_mode: bool,
    pub resume: bool,
    pub hard_timeouts: bool,
    pub grace_period: Duration,
    pub launch: LaunchStrategy,
}

impl DispatchOptions {
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let grace_period = parse_duration(&cfg.executor.grace_period).map_err(|e| {
            StagedagError::ConfigError(format!("invalid executor.grace_period: {e}"))
        })?;
        Ok(Self {
            fast_mode: cfg.pipeline.fast_mode,
            resume: cfg.pipeline.resume,
            hard_timeouts: cfg.pipeline.hard_timeouts,
            grace_period,
            launch: LaunchStrategy::from_config(&cfg.executor),
        })
    }
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            fast_mode: false,
            resume: true,
            hard_timeouts: false,
            grace_period: Duration::from_secs(10),
            launch: LaunchStrategy::Direct,
        }
    }
}

/// Result of preparing a task.
#[derive(Debug, Clone)]
pub enum Prepared {
    /// Run this process.
    Launch(ScheduledTask),
    /// Finished without a process (reused, or failed before launch).
    Done(TaskOutcome),
}

/// Result of the first half of preparation.
#[derive(Debug)]
pub enum Staged {
    /// Inputs resolved and the command rendered; the inputs still need
    /// fingerprinting before the task can launch.
    Fingerprint(FingerprintJob),
    /// Failed before launch.
    Done(TaskOutcome),
}

/// Blocking content hash of a staged task's command and inputs.
#[derive(Debug)]
pub struct FingerprintJob {
    task: TaskId,
    fs: Arc<dyn FileSystem>,
    command: String,
    inputs: ResolvedInputs,
}

impl FingerprintJob {
    pub fn task(&self) -> &TaskId {
        &self.task
    }

    /// Reads every input file; run it on a blocking thread.
    pub fn run(self) -> anyhow::Result<String> {
        task_fingerprint(&*self.fs, &self.command, &self.inputs)
    }
}

/// A staged task waiting for its fingerprint.
#[derive(Debug)]
struct StagedTask {
    command: String,
    estimate: ResourceEstimate,
}

/// Owns the artifact store and the fingerprint store for one run.
pub struct Dispatcher {
    fs: Arc<dyn FileSystem>,
    store: ArtifactStore,
    fingerprints: Box<dyn FingerprintStore>,
    options: DispatchOptions,
    staged: HashMap<TaskId, StagedTask>,
    /// Fingerprints of launched tasks, saved once their outputs verify.
    in_flight: HashMap<TaskId, String>,
    /// Tasks handed to the executor, i.e. those with a log file.
    launched: HashSet<TaskId>,
    estimates: BTreeMap<TaskId, ResourceEstimate>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("store", &self.store)
            .field("options", &self.options)
            .field("staged", &self.staged)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        graph: &TaskGraph,
        fingerprints: Box<dyn FingerprintStore>,
        options: DispatchOptions,
    ) -> Self {
        let store = ArtifactStore::new(Arc::clone(&fs), graph.artifact_specs().values().cloned());
        Self {
            fs,
            store,
            fingerprints,
            options,
            staged: HashMap::new(),
            in_flight: HashMap::new(),
            launched: HashSet::new(),
            estimates: BTreeMap::new(),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Estimate computed for a task during preparation, if it got that far.
    pub fn estimate_of(&self, task: &str) -> Option<&ResourceEstimate> {
        self.estimates.get(task)
    }

    pub fn estimates(&self) -> &BTreeMap<TaskId, ResourceEstimate> {
        &self.estimates
    }

    pub fn launched(&self) -> &HashSet<TaskId> {
        &self.launched
    }

    /// Drop fingerprints of tasks that no longer exist in the graph.
    pub fn prune_stale(&mut self, graph: &TaskGraph) {
        let active: Vec<&str> = graph.task_ids().map(|id| id.as_str()).collect();
        if let Err(err) = self.fingerprints.prune(&active) {
            warn!(error = %err, "failed to prune stale fingerprints");
        }
    }

    /// Stage and complete `task` on the current thread.
    pub fn prepare(&mut self, task: &TaskDescriptor) -> Prepared {
        match self.stage(task) {
            Staged::Fingerprint(job) => {
                let fingerprint = job.run();
                self.complete(task, fingerprint)
            }
            Staged::Done(outcome) => Prepared::Done(outcome),
        }
    }

    /// Resolve inputs, estimate resources and render the command.
    pub fn stage(&mut self, task: &TaskDescriptor) -> Staged {
        match self.try_stage(task) {
            Ok(job) => Staged::Fingerprint(job),
            Err(failure) => {
                self.forget_fingerprint(&task.id);
                Staged::Done(TaskOutcome::Failed(failure))
            }
        }
    }

    fn try_stage(&mut self, task: &TaskDescriptor) -> std::result::Result<FingerprintJob, TaskFailure> {
        let inputs = self.resolve_inputs(task)?;

        let estimate = self.estimate(task, &inputs)?;
        self.estimates.insert(task.id.clone(), estimate);
        debug!(
            task = %task.id,
            cpu = estimate.cpu,
            memory_mb = estimate.memory_mb,
            time_minutes = estimate.time_minutes(),
            "estimated resources"
        );

        let ctx = RenderContext {
            task,
            inputs: &inputs,
            estimate: Some(&estimate),
        };
        let command = task
            .command
            .render(&ctx)
            .map_err(|e| TaskFailure::Launch(format!("rendering command: {e}")))?;

        self.staged.insert(
            task.id.clone(),
            StagedTask {
                command: command.clone(),
                estimate,
            },
        );
        Ok(FingerprintJob {
            task: task.id.clone(),
            fs: Arc::clone(&self.fs),
            command,
            inputs,
        })
    }

    /// Second half of preparation, once the fingerprint is known: reuse
    /// the previous outputs or hand the task to the executor.
    pub fn complete(
        &mut self,
        task: &TaskDescriptor,
        fingerprint: anyhow::Result<String>,
    ) -> Prepared {
        match self.try_complete(task, fingerprint) {
            Ok(prepared) => prepared,
            Err(failure) => {
                self.forget_fingerprint(&task.id);
                Prepared::Done(TaskOutcome::Failed(failure))
            }
        }
    }

    fn try_complete(
        &mut self,
        task: &TaskDescriptor,
        fingerprint: anyhow::Result<String>,
    ) -> std::result::Result<Prepared, TaskFailure> {
        let StagedTask { command, estimate } = self
            .staged
            .remove(&task.id)
            .ok_or_else(|| TaskFailure::Launch(format!("task '{}' was not staged", task.id)))?;
        let fingerprint = fingerprint
            .map_err(|e| TaskFailure::Launch(format!("fingerprinting inputs: {e:#}")))?;

        if self.options.resume && self.fingerprint_matches(&task.id, &fingerprint) {
            match self.store.publish(task) {
                Ok(_) => {
                    info!(task = %task.id, "fingerprint unchanged; reusing outputs");
                    return Ok(Prepared::Done(TaskOutcome::Succeeded { reused: true }));
                }
                Err(err) => {
                    debug!(task = %task.id, error = %err, "fingerprint matches but outputs are missing; re-running");
                }
            }
        }

        self.create_task_dirs(task)
            .map_err(|e| TaskFailure::Launch(format!("creating output directories: {e:#}")))?;

        let full_command = self.options.launch.wrap(task, &command, &estimate);
        self.in_flight.insert(task.id.clone(), fingerprint);
        self.launched.insert(task.id.clone());

        Ok(Prepared::Launch(ScheduledTask {
            id: task.id.clone(),
            command: full_command,
            estimate,
            log_path: task.log_path.clone(),
            hard_timeout: self.options.hard_timeouts,
            grace_period: self.options.grace_period,
        }))
    }

    /// Resolve every input of `task` to a value, paths, or absence.
    pub fn resolve_inputs(
        &mut self,
        task: &TaskDescriptor,
    ) -> std::result::Result<ResolvedInputs, TaskFailure> {
        let mut resolved = BTreeMap::new();

        for input in &task.inputs {
            let value = match &input.binding {
                InputBinding::Value(v) => ResolvedInput::Value(v.clone()),
                InputBinding::Path(path) => {
                    if self.fs.exists(path) {
                        ResolvedInput::Paths(vec![path.clone()])
                    } else {
                        unavailable(input, ResolveError::MissingPath(path.clone()))?
                    }
                }
                InputBinding::Artifact(r) => match self.store.resolve(r, &task.id) {
                    Ok(path) => ResolvedInput::Paths(vec![path]),
                    Err(err) => unavailable(input, err)?,
                },
                InputBinding::Gather(refs) => {
                    let mut paths = Vec::with_capacity(refs.len());
                    for r in refs {
                        match self.store.resolve(r, &task.id) {
                            Ok(path) => paths.push(path),
                            Err(err) => {
                                unavailable(input, err)?;
                            }
                        }
                    }
                    if paths.is_empty() {
                        ResolvedInput::Absent
                    } else {
                        ResolvedInput::Paths(paths)
                    }
                }
            };

            if value == ResolvedInput::Absent {
                debug!(task = %task.id, input = %input.name, "optional input absent");
            }
            resolved.insert(input.name.clone(), value);
        }

        Ok(resolved)
    }

    fn estimate(
        &self,
        task: &TaskDescriptor,
        inputs: &ResolvedInputs,
    ) -> std::result::Result<ResourceEstimate, TaskFailure> {
        let counted: Vec<CountedInput> = task
            .inputs
            .iter()
            .filter_map(|input| {
                let pattern = input.pattern.as_ref()?;
                match inputs.get(&input.name)? {
                    ResolvedInput::Paths(paths) => Some(
                        paths
                            .iter()
                            .map(|dir| CountedInput {
                                dir: dir.clone(),
                                pattern: pattern.clone(),
                            })
                            .collect::<Vec<_>>(),
                    ),
                    ResolvedInput::Absent | ResolvedInput::Value(_) => None,
                }
            })
            .flatten()
            .collect();

        let estimate = estimate_task(
            &*self.fs,
            &task.id,
            &task.resources,
            &counted,
            self.options.fast_mode,
        )
        .map_err(|e| TaskFailure::Launch(format!("counting inputs: {e:#}")))??;
        Ok(estimate)
    }

    fn fingerprint_matches(&self, task: &str, fingerprint: &str) -> bool {
        match self.fingerprints.load(task) {
            Ok(Some(previous)) => previous == fingerprint,
            Ok(None) => false,
            Err(err) => {
                warn!(task = %task, error = %err, "failed to read fingerprint; running task");
                false
            }
        }
    }

    fn create_task_dirs(&self, task: &TaskDescriptor) -> anyhow::Result<()> {
        self.fs.create_dir_all(&task.output_dir)?;
        for output in &task.outputs {
            if let Some(parent) = output.path.parent() {
                self.fs.create_dir_all(parent)?;
            }
        }
        if let Some(parent) = task.log_path.parent() {
            self.fs.create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Turn a process exit into the task's outcome.
    pub fn finalize(&mut self, task: &TaskDescriptor, exit: ProcessExit) -> TaskOutcome {
        self.staged.remove(&task.id);
        let fingerprint = self.in_flight.remove(&task.id);

        let outcome = if exit.success() {
            match self.store.publish(task) {
                Ok(report) => {
                    debug!(
                        task = %task.id,
                        published = report.published.len(),
                        absent = report.absent.len(),
                        "outputs published"
                    );
                    if let Some(fingerprint) = fingerprint {
                        if let Err(err) = self.fingerprints.save(&task.id, &fingerprint) {
                            warn!(task = %task.id, error = %err, "failed to save fingerprint");
                        }
                    }
                    TaskOutcome::Succeeded { reused: false }
                }
                Err(err) => TaskOutcome::Failed(TaskFailure::ArtifactContract(err)),
            }
        } else {
            TaskOutcome::Failed(match exit {
                ProcessExit::Exited {
                    exit_code,
                    timed_out,
                } => TaskFailure::Execution {
                    exit_code,
                    timed_out,
                },
                ProcessExit::Cancelled => TaskFailure::Cancelled,
                ProcessExit::LaunchFailed(msg) => TaskFailure::Launch(msg),
            })
        };

        if !outcome.is_success() {
            self.forget_fingerprint(&task.id);
        }
        outcome
    }

    fn forget_fingerprint(&mut self, task: &str) {
        if let Err(err) = self.fingerprints.remove(task) {
            warn!(task = %task, error = %err, "failed to remove fingerprint");
        }
    }
}

/// Optional inputs tolerate absence; anything else fails the task.
fn unavailable(input: &TaskInput, err: ResolveError) -> std::result::Result<ResolvedInput, TaskFailure> {
    match err {
        ResolveError::NotFound(_) | ResolveError::MissingPath(_) if input.optional => {
            Ok(ResolvedInput::Absent)
        }
        source => Err(TaskFailure::Input {
            input: input.name.clone(),
            source,
        }),
    }
}
