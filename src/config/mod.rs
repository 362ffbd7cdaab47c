// src/config/mod.rs

//! Configuration loading and validation for stagedag.
//!
//! - [`model`] defines the TOML-backed data model.
//! - [`loader`] reads a config file from disk.
//! - [`validate`] turns a [`RawConfigFile`] into a checked [`ConfigFile`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_str};
pub use model::{
    ConfigFile, ExecutorSection, FanOutConfig, InputConfig, OutputConfig, PipelineSection,
    RawConfigFile, ResourceConfig, StageConfig,
};
