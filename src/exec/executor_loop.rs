// src/exec/executor_loop.rs

//! Main executor loop that manages running task processes.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::dag::ScheduledTask;
use crate::engine::RuntimeEvent;
use crate::exec::task_runner::run_task;
use crate::types::TaskId;

/// Requests accepted by the executor loop.
#[derive(Debug)]
pub enum ExecutorMessage {
    Run(ScheduledTask),
    CancelAll,
}

/// Internal handle for a currently-running task process.
///
/// - `cancel` asks the runner to terminate the process.
/// - `handle` is the Tokio task that is actually running the command.
struct ActiveTask {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// Each scheduled task is executed in its own Tokio task. The scheduler
/// never dispatches the same task twice, so a duplicate request is ignored.
pub fn spawn_executor(runtime_tx: mpsc::Sender<RuntimeEvent>) -> mpsc::Sender<ExecutorMessage> {
    let (tx, mut rx) = mpsc::channel::<ExecutorMessage>(32);

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<TaskId, ActiveTask> = HashMap::new();

        while let Some(message) = rx.recv().await {
            active.retain(|_, t| !t.handle.is_finished());
            match message {
                ExecutorMessage::Run(task) => handle_scheduled_task(task, &mut active, &runtime_tx),
                ExecutorMessage::CancelAll => cancel_all(&mut active),
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn handle_scheduled_task(
    task: ScheduledTask,
    active: &mut HashMap<TaskId, ActiveTask>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) {
    let id = task.id.clone();

    if active.contains_key(&id) {
        warn!(task = %id, "task already running; ignoring duplicate dispatch");
        return;
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let rt_tx = runtime_tx.clone();
    let spawn_id = id.clone();

    let handle = tokio::spawn(async move {
        run_task(task, rt_tx, cancel_rx).await;
        debug!(task = %spawn_id, "task runner future finished");
    });

    active.insert(
        id,
        ActiveTask {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

fn cancel_all(active: &mut HashMap<TaskId, ActiveTask>) {
    info!(running = active.len(), "cancelling running tasks");

    for (id, task) in active.iter_mut() {
        if let Some(cancel) = task.cancel.take() {
            if cancel.send(()).is_err() {
                debug!(task = %id, "process already finished while cancelling");
            }
        }
    }
}
