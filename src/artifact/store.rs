// src/artifact/store.rs

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::artifact::{ArtifactRef, ArtifactSpec, ConsumptionMode};
use crate::errors::{ArtifactContractError, ResolveError};
use crate::fs::FileSystem;
use crate::task::TaskDescriptor;
use crate::types::TaskId;

/// Run-time state of one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactState {
    /// Producer has not completed (or failed).
    Unpublished,
    /// Producer succeeded and the file exists.
    Published,
    /// Producer succeeded but this optional output was not created.
    Absent,
    /// Single-use artifact handed to its consumer.
    Consumed { by: TaskId },
}

#[derive(Debug)]
struct Entry {
    spec: ArtifactSpec,
    state: ArtifactState,
}

/// Outcome of a successful [`ArtifactStore::publish`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub published: Vec<ArtifactRef>,
    pub absent: Vec<ArtifactRef>,
}

/// Tracks produced artifacts for one run.
///
/// The store is owned by the coordinating runtime, which is the only writer;
/// each artifact is written by exactly one producer and is immutable once
/// published.
#[derive(Debug)]
pub struct ArtifactStore {
    fs: Arc<dyn FileSystem>,
    entries: HashMap<ArtifactRef, Entry>,
}

impl ArtifactStore {
    pub fn new(fs: Arc<dyn FileSystem>, specs: impl IntoIterator<Item = ArtifactSpec>) -> Self {
        let entries = specs
            .into_iter()
            .map(|spec| {
                let key = ArtifactRef::new(spec.producer.clone(), spec.output.clone());
                (
                    key,
                    Entry {
                        spec,
                        state: ArtifactState::Unpublished,
                    },
                )
            })
            .collect();
        Self { fs, entries }
    }

    /// Register the outputs of a task whose process exited with code 0.
    ///
    /// Every required output must exist on disk; otherwise nothing is
    /// published and an [`ArtifactContractError`] is returned. Missing
    /// optional outputs are recorded as [`ArtifactState::Absent`].
    pub fn publish(
        &mut self,
        task: &TaskDescriptor,
    ) -> std::result::Result<PublishReport, ArtifactContractError> {
        let missing: Vec<String> = task
            .outputs
            .iter()
            .filter(|o| o.required && !self.fs.exists(&o.path))
            .map(|o| o.name.clone())
            .collect();

        if !missing.is_empty() {
            warn!(
                task = %task.id,
                ?missing,
                "required outputs missing after successful exit"
            );
            return Err(ArtifactContractError {
                task: task.id.clone(),
                missing,
            });
        }

        let mut report = PublishReport::default();
        for output in &task.outputs {
            let key = ArtifactRef::new(task.id.clone(), output.name.clone());
            let present = self.fs.exists(&output.path);
            let state = if present {
                ArtifactState::Published
            } else {
                ArtifactState::Absent
            };

            match self.entries.get_mut(&key) {
                Some(entry) => entry.state = state,
                None => {
                    warn!(artifact = %key, "publishing artifact unknown to the graph");
                    continue;
                }
            }

            if present {
                report.published.push(key);
            } else {
                debug!(artifact = %key, "optional output absent");
                report.absent.push(key);
            }
        }

        info!(
            task = %task.id,
            published = report.published.len(),
            absent = report.absent.len(),
            "published task outputs"
        );
        Ok(report)
    }

    /// Hand the path of `artifact` to `consumer`.
    ///
    /// Broadcast artifacts are never exhausted. A single-use artifact is
    /// marked consumed by its first consumer; the same consumer may resolve
    /// it again, any other consumer gets [`ResolveError::AlreadyConsumed`].
    pub fn resolve(
        &mut self,
        artifact: &ArtifactRef,
        consumer: &str,
    ) -> std::result::Result<PathBuf, ResolveError> {
        let entry = self
            .entries
            .get_mut(artifact)
            .ok_or_else(|| ResolveError::NotFound(artifact.to_string()))?;

        match (entry.state.clone(), entry.spec.mode) {
            (ArtifactState::Published, ConsumptionMode::Broadcast) => Ok(entry.spec.path.clone()),
            (ArtifactState::Published, ConsumptionMode::SingleUse) => {
                entry.state = ArtifactState::Consumed {
                    by: consumer.to_string(),
                };
                debug!(artifact = %artifact, consumer, "single-use artifact consumed");
                Ok(entry.spec.path.clone())
            }
            (ArtifactState::Consumed { by }, _) if by == consumer => Ok(entry.spec.path.clone()),
            (ArtifactState::Consumed { by }, _) => Err(ResolveError::AlreadyConsumed {
                artifact: artifact.to_string(),
                consumer: by,
            }),
            (ArtifactState::Unpublished | ArtifactState::Absent, _) => {
                Err(ResolveError::NotFound(artifact.to_string()))
            }
        }
    }

    pub fn state_of(&self, artifact: &ArtifactRef) -> Option<&ArtifactState> {
        self.entries.get(artifact).map(|e| &e.state)
    }

    pub fn spec_of(&self, artifact: &ArtifactRef) -> Option<&ArtifactSpec> {
        self.entries.get(artifact).map(|e| &e.spec)
    }
}
