// src/pipeline/mod.rs

//! Resolved pipeline model: stages, fan-out sets, parameters.

pub mod definition;

pub use definition::{
    FanOut, InputDecl, InputSource, OutputDecl, PipelineDefinition, Selection, Stage,
};
