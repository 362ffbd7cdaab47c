// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender,
//! so tests can swap in a fake executor.
//!
//! - `RealExecutorBackend` wraps the `spawn_executor` loop and forwards
//!   scheduled tasks over an mpsc channel.
//! - Tests provide their own `ExecutorBackend` that, for example, records
//!   which tasks were scheduled and directly emits `TaskExited` events.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::dag::ScheduledTask;
use crate::engine::RuntimeEvent;
use crate::errors::{Error, Result};

use super::executor_loop::{ExecutorMessage, spawn_executor};

/// Trait abstracting how scheduled tasks are executed.
pub trait ExecutorBackend: Send {
    /// Start the given tasks. Each must eventually produce exactly one
    /// `RuntimeEvent::TaskExited`.
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Terminate every running task. Each still reports `TaskExited`
    /// (with `ProcessExit::Cancelled`).
    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecutorMessage>,
}

impl RealExecutorBackend {
    /// Create a backend wired to the given runtime event sender.
    ///
    /// This spawns the background executor loop immediately.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        let tx = spawn_executor(runtime_tx);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for task in tasks {
                tx.send(ExecutorMessage::Run(task))
                    .await
                    .map_err(Error::from)?;
            }
            Ok(())
        })
    }

    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            tx.send(ExecutorMessage::CancelAll)
                .await
                .map_err(Error::from)?;
            Ok(())
        })
    }
}
