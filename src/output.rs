// src/output.rs

//! Deterministic output layout.
//!
//! A task's output directory is `output_root` joined with its stage's
//! nesting segments, after rendering `{stage}` and `{sample}`. Empty
//! segments are skipped, so `nesting = []`, no nesting at all, and a
//! `{sample}` segment on a single-instance stage all produce the same
//! layout. There is no implicit default segment.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputOrganizer {
    root: PathBuf,
    state_dir: PathBuf,
}

impl OutputOrganizer {
    pub fn new(root: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state_dir: state_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Directory that holds every output of the given stage instance.
    pub fn task_dir(&self, stage: &str, key: Option<&str>, nesting: &[String]) -> PathBuf {
        let mut dir = self.root.clone();
        for segment in nesting {
            let rendered = render_segment(segment, stage, key);
            let trimmed = rendered.trim_matches('/');
            if !trimmed.trim().is_empty() {
                dir.push(trimmed);
            }
        }
        dir
    }

    /// Path of one output: `task_dir / rendered pattern`.
    pub fn path_for(
        &self,
        stage: &str,
        key: Option<&str>,
        output_pattern: &str,
        nesting: &[String],
    ) -> PathBuf {
        self.task_dir(stage, key, nesting)
            .join(render_segment(output_pattern, stage, key))
    }

    /// Captured stdout/stderr of a task: `<state_dir>/logs/<stage>/<key|stage>.log`.
    pub fn log_path_for(&self, stage: &str, key: Option<&str>) -> PathBuf {
        let file = format!("{}.log", key.unwrap_or(stage));
        self.state_dir.join("logs").join(stage).join(file)
    }
}

fn render_segment(template: &str, stage: &str, key: Option<&str>) -> String {
    template
        .replace("{stage}", stage)
        .replace("{sample}", key.unwrap_or(""))
}
