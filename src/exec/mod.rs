// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running prepared task commands,
//! using `tokio::process::Command`, and reporting back to the orchestration
//! runtime via `RuntimeEvent`s.
//!
//! - [`executor_loop`] owns the loop that manages running task processes.
//! - [`task_runner`] runs one process: log capture, timeouts, termination.
//! - [`launch`] wraps commands for direct or cluster-launcher execution.
//! - [`backend`] provides the `ExecutorBackend` trait and the concrete
//!   `RealExecutorBackend` used in production, which tests replace with a
//!   fake implementation.

pub mod backend;
pub mod executor_loop;
pub mod launch;
pub mod task_runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use executor_loop::{ExecutorMessage, spawn_executor};
pub use launch::LaunchStrategy;
