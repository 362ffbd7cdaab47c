// src/state/mod.rs

//! Persistent resume state.
//!
//! After a task succeeds its fingerprint is recorded here; a later run that
//! computes the same fingerprint for the same task can reuse its outputs.
//! The file-backed store keeps one `"<task-id> <fingerprint>"` line per task
//! in `<state_dir>/fingerprints`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::fs::FileSystem;
use crate::types::TaskId;

/// File name (inside the state dir) of the fingerprint file.
pub const FINGERPRINT_FILE: &str = "fingerprints";

/// Abstract storage for task fingerprints.
pub trait FingerprintStore: Send {
    fn load(&self, task: &str) -> Result<Option<String>>;
    fn save(&mut self, task: &str, fingerprint: &str) -> Result<()>;
    fn remove(&mut self, task: &str) -> Result<()>;
    /// Remove fingerprints for tasks that are not in `active_tasks`.
    fn prune(&mut self, active_tasks: &[&str]) -> Result<()>;
}

/// Stores fingerprints in `<state_dir>/fingerprints`.
#[derive(Debug)]
pub struct FileFingerprintStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl FileFingerprintStore {
    pub fn new(fs: Arc<dyn FileSystem>, state_dir: &Path) -> Self {
        Self {
            fs,
            path: state_dir.join(FINGERPRINT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_all(&self) -> Result<BTreeMap<TaskId, String>> {
        if !self.fs.is_file(&self.path) {
            return Ok(BTreeMap::new());
        }

        let contents = self
            .fs
            .read_to_string(&self.path)
            .with_context(|| format!("reading fingerprint file at {:?}", self.path))?;

        let mut map = BTreeMap::new();
        for line in contents.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some((task, fingerprint)) = trimmed.split_once(char::is_whitespace) {
                map.insert(task.to_string(), fingerprint.trim().to_string());
            }
        }
        Ok(map)
    }

    fn save_all(&self, map: &BTreeMap<TaskId, String>) -> Result<()> {
        let mut out = String::new();
        for (task, fingerprint) in map {
            out.push_str(task);
            out.push(' ');
            out.push_str(fingerprint);
            out.push('\n');
        }
        self.fs
            .write(&self.path, out.as_bytes())
            .with_context(|| format!("writing fingerprint file at {:?}", self.path))
    }
}

impl FingerprintStore for FileFingerprintStore {
    fn load(&self, task: &str) -> Result<Option<String>> {
        Ok(self.load_all()?.get(task).cloned())
    }

    fn save(&mut self, task: &str, fingerprint: &str) -> Result<()> {
        let mut map = self.load_all()?;
        map.insert(task.to_string(), fingerprint.to_string());
        self.save_all(&map)?;
        debug!(task = %task, fingerprint = %fingerprint, "stored task fingerprint");
        Ok(())
    }

    fn remove(&mut self, task: &str) -> Result<()> {
        let mut map = self.load_all()?;
        if map.remove(task).is_some() {
            self.save_all(&map)?;
            debug!(task = %task, "removed task fingerprint");
        }
        Ok(())
    }

    fn prune(&mut self, active_tasks: &[&str]) -> Result<()> {
        let mut map = self.load_all()?;
        let initial_len = map.len();
        map.retain(|k, _| active_tasks.contains(&k.as_str()));

        if map.len() < initial_len {
            self.save_all(&map)?;
            info!(
                removed = initial_len - map.len(),
                "pruned stale task fingerprints"
            );
        }
        Ok(())
    }
}

/// Stores fingerprints in memory only.
#[derive(Debug, Clone, Default)]
pub struct MemoryFingerprintStore {
    map: BTreeMap<TaskId, String>,
}

impl MemoryFingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl FingerprintStore for MemoryFingerprintStore {
    fn load(&self, task: &str) -> Result<Option<String>> {
        Ok(self.map.get(task).cloned())
    }

    fn save(&mut self, task: &str, fingerprint: &str) -> Result<()> {
        self.map.insert(task.to_string(), fingerprint.to_string());
        Ok(())
    }

    fn remove(&mut self, task: &str) -> Result<()> {
        self.map.remove(task);
        Ok(())
    }

    fn prune(&mut self, active_tasks: &[&str]) -> Result<()> {
        self.map.retain(|k, _| active_tasks.contains(&k.as_str()));
        Ok(())
    }
}
