use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use stagedag::dag::{ScheduledTask, TaskGraph};
use stagedag::engine::{ProcessExit, RuntimeEvent};
use stagedag::errors::{Error, Result};
use stagedag::exec::ExecutorBackend;
use stagedag::fs::mock::MockFileSystem;
use stagedag::types::TaskId;

/// A fake executor that:
/// - records every task it is asked to run
/// - "runs" it by writing the task's declared outputs into a `MockFileSystem`
/// - immediately reports `TaskExited` for it
///
/// Tasks can be told to fail, to leave out some outputs, or to hang until
/// `cancel_all` is called.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    graph: Arc<TaskGraph>,
    fs: MockFileSystem,
    invocations: Arc<Mutex<Vec<ScheduledTask>>>,
    failing: HashSet<TaskId>,
    omitted: HashSet<(TaskId, String)>,
    hanging: HashSet<TaskId>,
    held: Vec<TaskId>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        graph: Arc<TaskGraph>,
        fs: MockFileSystem,
    ) -> Self {
        Self {
            runtime_tx,
            graph,
            fs,
            invocations: Arc::new(Mutex::new(Vec::new())),
            failing: HashSet::new(),
            omitted: HashSet::new(),
            hanging: HashSet::new(),
            held: Vec::new(),
        }
    }

    /// Exit non-zero without writing anything.
    pub fn fail(mut self, task: &str) -> Self {
        self.failing.insert(task.to_string());
        self
    }

    /// Exit zero but do not write `output`.
    pub fn omit_output(mut self, task: &str, output: &str) -> Self {
        self.omitted.insert((task.to_string(), output.to_string()));
        self
    }

    /// Never exit on its own; only `cancel_all` ends it.
    pub fn hang(mut self, task: &str) -> Self {
        self.hanging.insert(task.to_string());
        self
    }

    /// Shared handle to the recorded invocations, in launch order.
    pub fn invocations(&self) -> Arc<Mutex<Vec<ScheduledTask>>> {
        Arc::clone(&self.invocations)
    }

    fn write_outputs(&self, task: &str) {
        let Some(descriptor) = self.graph.get(task) else {
            return;
        };
        for output in &descriptor.outputs {
            if self.omitted.contains(&(task.to_string(), output.name.clone())) {
                continue;
            }
            self.fs
                .add_file(&output.path, format!("{task}:{}", output.name));
        }
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for t in tasks {
                self.invocations.lock().unwrap().push(t.clone());

                if self.hanging.contains(&t.id) {
                    self.held.push(t.id.clone());
                    continue;
                }

                let exit_code = if self.failing.contains(&t.id) {
                    1
                } else {
                    self.write_outputs(&t.id);
                    0
                };

                self.runtime_tx
                    .send(RuntimeEvent::TaskExited {
                        task: t.id.clone(),
                        exit: ProcessExit::Exited {
                            exit_code: Some(exit_code),
                            timed_out: false,
                        },
                    })
                    .await
                    .map_err(Error::from)?;
            }
            Ok(())
        })
    }

    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for task in std::mem::take(&mut self.held) {
                self.runtime_tx
                    .send(RuntimeEvent::TaskExited {
                        task,
                        exit: ProcessExit::Cancelled,
                    })
                    .await
                    .map_err(Error::from)?;
            }
            Ok(())
        })
    }
}
