// src/report.rs

//! End-of-run summary: one entry per task with its terminal status, error
//! kind, detail and diagnostic log path. Printed as text on stdout and
//! optionally written as JSON.

use std::collections::{BTreeMap, HashSet};
use std::io::{self, Write};
use std::path::PathBuf;

use serde::Serialize;

use crate::dag::{Scheduler, SkipCause, TaskGraph, TaskRunState};
use crate::engine::TaskOutcome;
use crate::estimate::ResourceEstimate;
use crate::types::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Succeeded,
    Failed,
    Skipped,
    /// Still pending or running when the run stopped.
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EstimateReport {
    pub cpu: u32,
    pub memory_mb: u64,
    pub time_minutes: u64,
}

impl From<&ResourceEstimate> for EstimateReport {
    fn from(e: &ResourceEstimate) -> Self {
        Self {
            cpu: e.cpu,
            memory_mb: e.memory_mb,
            time_minutes: e.time_minutes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub stage: String,
    pub key: Option<String>,
    pub status: ReportStatus,
    pub reused: bool,
    /// Stable error kind (`ExecutionError`, `ArtifactContractError`, ...).
    pub error_kind: Option<String>,
    pub detail: Option<String>,
    /// Process output; `None` when no process was started.
    pub log_path: Option<PathBuf>,
    pub estimate: Option<EstimateReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub success: bool,
    pub cancelled: bool,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    /// Assemble the report from the final scheduler state and recorded
    /// outcomes. Tasks appear in graph order.
    pub fn from_run(
        pipeline: &str,
        graph: &TaskGraph,
        scheduler: &Scheduler,
        outcomes: &BTreeMap<TaskId, TaskOutcome>,
        estimates: &BTreeMap<TaskId, ResourceEstimate>,
        launched: &HashSet<TaskId>,
    ) -> Self {
        let tasks: Vec<TaskReport> = graph
            .tasks()
            .map(|task| {
                let (status, reused, error_kind, detail) = match outcomes.get(&task.id) {
                    Some(TaskOutcome::Succeeded { reused }) => {
                        (ReportStatus::Succeeded, *reused, None, None)
                    }
                    Some(TaskOutcome::Failed(failure)) => (
                        ReportStatus::Failed,
                        false,
                        Some(failure.kind().to_string()),
                        Some(failure.to_string()),
                    ),
                    None => match scheduler.run_state_of(&task.id) {
                        Some(TaskRunState::Skipped) => {
                            let detail = match scheduler.skip_cause_of(&task.id) {
                                Some(SkipCause::UpstreamFailed(up)) => {
                                    format!("upstream task '{up}' failed")
                                }
                                Some(SkipCause::Cancelled) | None => "run cancelled".to_string(),
                            };
                            (ReportStatus::Skipped, false, None, Some(detail))
                        }
                        _ => (ReportStatus::Incomplete, false, None, None),
                    },
                };

                TaskReport {
                    id: task.id.clone(),
                    stage: task.stage.clone(),
                    key: task.key.clone(),
                    status,
                    reused,
                    error_kind,
                    detail,
                    log_path: launched
                        .contains(&task.id)
                        .then(|| task.log_path.clone()),
                    estimate: estimates.get(&task.id).map(EstimateReport::from),
                }
            })
            .collect();

        let success = tasks.iter().all(|t| t.status == ReportStatus::Succeeded);

        Self {
            pipeline: pipeline.to_string(),
            success,
            cancelled: scheduler.is_cancelled(),
            tasks,
        }
    }

    pub fn task(&self, id: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn count(&self, status: ReportStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary.
    pub fn write_summary(&self, out: &mut impl Write) -> io::Result<()> {
        let verdict = if self.success {
            "succeeded"
        } else if self.cancelled {
            "cancelled"
        } else {
            "failed"
        };
        writeln!(out, "pipeline {}: {}", self.pipeline, verdict)?;
        writeln!(
            out,
            "  {} succeeded ({} reused), {} failed, {} skipped",
            self.count(ReportStatus::Succeeded),
            self.tasks.iter().filter(|t| t.reused).count(),
            self.count(ReportStatus::Failed),
            self.count(ReportStatus::Skipped),
        )?;

        for task in &self.tasks {
            let status = match (task.status, task.reused) {
                (ReportStatus::Succeeded, true) => "reused",
                (ReportStatus::Succeeded, false) => "ok",
                (ReportStatus::Failed, _) => "FAILED",
                (ReportStatus::Skipped, _) => "skipped",
                (ReportStatus::Incomplete, _) => "incomplete",
            };
            write!(out, "  {:<10} {}", status, task.id)?;
            if let Some(kind) = &task.error_kind {
                write!(out, " [{kind}]")?;
            }
            if let Some(detail) = &task.detail {
                write!(out, ": {detail}")?;
            }
            writeln!(out)?;
            if task.status == ReportStatus::Failed {
                match &task.log_path {
                    Some(log) => writeln!(out, "             log: {}", log.display())?,
                    None => writeln!(out, "             log: none (not launched)")?,
                }
            }
        }
        Ok(())
    }
}
