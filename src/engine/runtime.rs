// src/engine/runtime.rs

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::dag::TaskGraph;
use crate::errors::{Result, TaskFailure};
use crate::exec::ExecutorBackend;
use crate::report::RunReport;
use crate::types::TaskId;

use super::core::CoreRuntime;
use super::dispatch::{Dispatcher, Prepared, Staged};
use super::{CoreCommand, ProcessExit, RuntimeEvent, TaskOutcome};

type FingerprintResult = (TaskId, anyhow::Result<String>);

/// What woke the runtime up.
enum Wake {
    Event(Option<RuntimeEvent>),
    Fingerprinted(FingerprintResult),
    Idle,
}

/// Drives the scheduler in response to `RuntimeEvent`s, and delegates
/// process execution to an `ExecutorBackend`.
///
/// This is the IO shell around `CoreRuntime`, which contains the run
/// semantics. It owns the [`Dispatcher`] (artifact store and fingerprint
/// store), so every artifact write happens on this single task.
pub struct Runtime<E: ExecutorBackend> {
    pipeline: String,
    graph: Arc<TaskGraph>,
    core: CoreRuntime,
    dispatcher: Dispatcher,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    /// Events produced while executing commands (tasks that finished
    /// without a process, verified exits); handled before the channel.
    backlog: VecDeque<RuntimeEvent>,
    /// Input hashing runs on blocking threads so the loop keeps handling
    /// exits and shutdown requests meanwhile.
    fingerprinting: JoinSet<FingerprintResult>,
    /// Staged tasks whose fingerprint has not come back yet.
    awaiting_fingerprint: HashSet<TaskId>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("pipeline", &self.pipeline)
            .field("core", &self.core)
            .field("dispatcher", &self.dispatcher)
            .field("awaiting_fingerprint", &self.awaiting_fingerprint)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        pipeline: impl Into<String>,
        core: CoreRuntime,
        dispatcher: Dispatcher,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
    ) -> Self {
        let graph = Arc::clone(core.scheduler().graph());
        Self {
            pipeline: pipeline.into(),
            graph,
            core,
            dispatcher,
            event_rx,
            executor,
            backlog: VecDeque::new(),
            fingerprinting: JoinSet::new(),
            awaiting_fingerprint: HashSet::new(),
        }
    }

    /// Main event loop. Returns once every task is terminal (or the event
    /// channel closes) with the run report.
    pub async fn run(mut self) -> Result<RunReport> {
        info!(pipeline = %self.pipeline, tasks = self.graph.len(), "stagedag runtime started");
        self.backlog.push_back(RuntimeEvent::Start);

        loop {
            let event = match self.backlog.pop_front() {
                Some(e) => e,
                None => match self.wait().await {
                    Wake::Event(Some(e)) => e,
                    Wake::Event(None) => {
                        warn!("runtime event channel closed; exiting");
                        break;
                    }
                    Wake::Fingerprinted((task, fingerprint)) => {
                        self.launch_fingerprinted(task, fingerprint).await?;
                        continue;
                    }
                    Wake::Idle => continue,
                },
            };

            debug!(?event, "runtime received event");

            // Feed the event into the pure core and get commands back.
            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await?;
            }

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        let (scheduler, outcomes) = self.core.into_parts();
        let report = RunReport::from_run(
            &self.pipeline,
            &self.graph,
            &scheduler,
            &outcomes,
            self.dispatcher.estimates(),
            self.dispatcher.launched(),
        );
        info!(success = report.success, "runtime exiting");
        Ok(report)
    }

    async fn wait(&mut self) -> Wake {
        if self.fingerprinting.is_empty() {
            return Wake::Event(self.event_rx.recv().await);
        }
        tokio::select! {
            event = self.event_rx.recv() => Wake::Event(event),
            Some(joined) = self.fingerprinting.join_next() => match joined {
                Ok(result) => Wake::Fingerprinted(result),
                Err(err) => {
                    warn!(error = %err, "fingerprint task did not finish");
                    Wake::Idle
                }
            },
        }
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchTasks(tasks) => {
                self.dispatch(tasks).await?;
            }
            CoreCommand::FinalizeTask { task, exit } => {
                let outcome = match self.graph.get(&task) {
                    Some(descriptor) => self.dispatcher.finalize(descriptor, exit),
                    None => unknown_task(&task),
                };
                self.backlog
                    .push_back(RuntimeEvent::TaskCompleted { task, outcome });
            }
            CoreCommand::CancelRunning => {
                self.executor.cancel_all().await?;
                // Never launched; late fingerprints for these are ignored.
                for task in self.awaiting_fingerprint.drain() {
                    self.backlog.push_back(RuntimeEvent::TaskExited {
                        task,
                        exit: ProcessExit::Cancelled,
                    });
                }
            }
            CoreCommand::RequestExit => {
                debug!("core issued RequestExit command");
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, tasks: Vec<TaskId>) -> Result<()> {
        for id in tasks {
            let staged = match self.graph.get(&id) {
                Some(descriptor) => self.dispatcher.stage(descriptor),
                None => Staged::Done(unknown_task(&id)),
            };
            match staged {
                Staged::Fingerprint(job) => {
                    self.awaiting_fingerprint.insert(id.clone());
                    self.fingerprinting.spawn(async move {
                        let fingerprint = tokio::task::spawn_blocking(move || job.run())
                            .await
                            .unwrap_or_else(|e| Err(anyhow!("fingerprint job panicked: {e}")));
                        (id, fingerprint)
                    });
                }
                Staged::Done(outcome) => {
                    self.backlog
                        .push_back(RuntimeEvent::TaskCompleted { task: id, outcome });
                }
            }
        }
        Ok(())
    }

    async fn launch_fingerprinted(
        &mut self,
        task: TaskId,
        fingerprint: anyhow::Result<String>,
    ) -> Result<()> {
        if !self.awaiting_fingerprint.remove(&task) {
            debug!(task = %task, "fingerprint arrived after cancellation; dropping");
            return Ok(());
        }

        let prepared = match self.graph.get(&task) {
            Some(descriptor) => self.dispatcher.complete(descriptor, fingerprint),
            None => Prepared::Done(unknown_task(&task)),
        };
        match prepared {
            Prepared::Launch(scheduled) => {
                debug!(task = %task, "spawning prepared task");
                self.executor.spawn_ready_tasks(vec![scheduled]).await
            }
            Prepared::Done(outcome) => {
                self.backlog
                    .push_back(RuntimeEvent::TaskCompleted { task, outcome });
                Ok(())
            }
        }
    }
}

fn unknown_task(task: &str) -> TaskOutcome {
    warn!(task = %task, "task missing from graph");
    TaskOutcome::Failed(TaskFailure::Launch(format!("unknown task '{task}'")))
}
