// src/task/mod.rs

//! Task descriptors and the pieces that turn one into a process invocation.
//!
//! - [`descriptor`] holds the immutable [`TaskDescriptor`].
//! - [`template`] parses and renders command templates.
//! - [`fingerprint`] hashes a prepared task for resume.

pub mod descriptor;
pub mod fingerprint;
pub mod template;

pub use descriptor::{
    InputBinding, ResolvedInput, ResolvedInputs, TaskDescriptor, TaskInput, TaskOutput,
};
pub use template::{CommandTemplate, Placeholder, RenderContext};
