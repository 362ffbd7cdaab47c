// src/exec/task_runner.rs

//! Individual task process runner.

use std::fs::OpenOptions;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, error, info, warn};

use crate::dag::ScheduledTask;
use crate::engine::{ProcessExit, RuntimeEvent};

/// Run a single task process and report exactly one `TaskExited` event.
///
/// - stdout and stderr are appended to the task's log file.
/// - When `estimate.time` elapses a warning is logged; with `hard_timeout`
///   the process is terminated and the exit is flagged `timed_out`.
/// - If the cancel channel fires the process group gets SIGTERM, then a
///   forced kill after `grace_period`, and the exit is reported as cancelled.
pub async fn run_task(
    task: ScheduledTask,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    cancel_rx: oneshot::Receiver<()>,
) {
    let id = task.id.clone();
    let exit = match run_task_inner(&task, cancel_rx).await {
        Ok(exit) => exit,
        Err(err) => {
            error!(task = %id, error = %err, "task execution error");
            ProcessExit::LaunchFailed(format!("{err:#}"))
        }
    };

    if runtime_tx
        .send(RuntimeEvent::TaskExited { task: id.clone(), exit })
        .await
        .is_err()
    {
        debug!(task = %id, "runtime gone; dropping exit event");
    }
}

fn build_command(task: &ScheduledTask) -> Result<Command> {
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&task.log_path)
        .with_context(|| format!("opening log file {:?}", task.log_path))?;
    let log_err = log
        .try_clone()
        .with_context(|| format!("duplicating log file handle {:?}", task.log_path))?;

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&task.command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&task.command);
        c
    };

    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .kill_on_drop(true);

    // Own process group, so termination reaches everything the shell forks.
    #[cfg(unix)]
    cmd.process_group(0);

    Ok(cmd)
}

async fn run_task_inner(
    task: &ScheduledTask,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<ProcessExit> {
    info!(
        task = %task.id,
        cmd = %task.command,
        log = ?task.log_path,
        "starting task process"
    );

    let mut child = build_command(task)?
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", task.id))?;

    let budget = sleep(task.estimate.time);
    tokio::pin!(budget);
    let mut budget_elapsed = false;
    let mut cancel_open = true;

    loop {
        tokio::select! {
            status_res = child.wait() => {
                let status = status_res.with_context(|| {
                    format!("waiting for process of task '{}'", task.id)
                })?;

                info!(
                    task = %task.id,
                    exit_code = status.code(),
                    success = status.success(),
                    "task process exited"
                );

                return Ok(ProcessExit::Exited {
                    exit_code: status.code(),
                    timed_out: false,
                });
            }

            _ = &mut budget, if !budget_elapsed => {
                budget_elapsed = true;
                if task.hard_timeout {
                    warn!(
                        task = %task.id,
                        limit_secs = task.estimate.time.as_secs(),
                        "task exceeded its time estimate; terminating"
                    );
                    let status = terminate(&mut child, &task.id, task.grace_period).await;
                    return Ok(ProcessExit::Exited {
                        exit_code: status,
                        timed_out: true,
                    });
                }
                warn!(
                    task = %task.id,
                    limit_secs = task.estimate.time.as_secs(),
                    "task exceeded its time estimate; still running"
                );
            }

            cancel = &mut cancel_rx, if cancel_open => {
                match cancel {
                    Ok(()) => {
                        info!(task = %task.id, "cancellation requested; terminating process");
                        terminate(&mut child, &task.id, task.grace_period).await;
                        return Ok(ProcessExit::Cancelled);
                    }
                    Err(_) => {
                        // Sender dropped without cancelling; keep waiting.
                        cancel_open = false;
                    }
                }
            }
        }
    }
}

/// SIGTERM to the task's process group, then SIGKILL to whatever is left
/// of the group once `grace` has passed.
///
/// Returns the shell's exit code if it exited on its own terms.
async fn terminate(child: &mut Child, task: &str, grace: Duration) -> Option<i32> {
    // The shell is the group leader; its pid is the group id.
    let group = child.id();
    let deadline = Instant::now() + grace;

    if let Some(pgid) = group {
        signal_group(task, pgid, "TERM").await;
    }

    let status = match timeout_at(deadline, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(task = %task, exit_code = status.code(), "process exited after SIGTERM");
            status.code()
        }
        Ok(Err(e)) => {
            warn!(task = %task, error = %e, "failed to wait for process after SIGTERM");
            None
        }
        Err(_) => {
            warn!(task = %task, grace_secs = grace.as_secs(), "grace period elapsed; killing process");
            if let Err(e) = child.kill().await {
                warn!(task = %task, error = %e, "failed to kill process");
            }
            None
        }
    };

    // Children of the shell may outlive it; give them the rest of the grace
    // period, then kill the group.
    if let Some(pgid) = group {
        while group_alive(pgid).await && Instant::now() < deadline {
            sleep(GROUP_POLL_INTERVAL).await;
        }
        if group_alive(pgid).await {
            warn!(task = %task, pgid, "process group outlived the grace period; killing it");
            signal_group(task, pgid, "KILL").await;
        }
    }

    status
}

const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(100);

async fn signal_group(task: &str, pgid: u32, signal: &str) {
    if !cfg!(unix) {
        return;
    }
    let sent = Command::new("kill")
        .arg(format!("-{signal}"))
        .arg("--")
        .arg(format!("-{pgid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = sent {
        warn!(task = %task, signal, error = %e, "failed to signal process group");
    }
}

/// Whether any process is still in group `pgid`.
async fn group_alive(pgid: u32) -> bool {
    if !cfg!(unix) {
        return false;
    }
    Command::new("kill")
        .arg("-0")
        .arg("--")
        .arg(format!("-{pgid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}
