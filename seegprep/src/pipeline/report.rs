//! Run reports.

use crate::core::StepStatus;
use crate::errors::PreprocessError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Step name.
    pub name: String,
    /// Final status.
    pub status: StepStatus,
    /// Time spent executing, zero when skipped.
    pub duration_ms: u64,
    /// Declared outputs.
    pub outputs: Vec<PathBuf>,
    /// Why the step ran, why it was skipped, or why it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StepReport {
    /// Creates a report for a skipped step.
    #[must_use]
    pub fn skipped(name: impl Into<String>, outputs: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Skipped,
            duration_ms: 0,
            outputs,
            reason: Some("outputs present".to_string()),
        }
    }

    /// Creates a report for a step that executed successfully.
    #[must_use]
    pub fn completed(name: impl Into<String>, outputs: Vec<PathBuf>, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Completed,
            duration_ms,
            outputs,
            reason: None,
        }
    }

    /// Creates a report for a step that executed and failed.
    #[must_use]
    pub fn failed(
        name: impl Into<String>,
        outputs: Vec<PathBuf>,
        duration_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Failed,
            duration_ms,
            outputs,
            reason: Some(error.into()),
        }
    }

    /// Sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Unique run id.
    pub run_id: Uuid,
    /// Subject id.
    pub subject: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Per-step outcomes, in execution order.
    pub steps: Vec<StepReport>,
    /// Path of the exported scene, if one was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_path: Option<PathBuf>,
    /// SHA-256 digests of the scene volumes, keyed by scene role.
    #[serde(default)]
    pub digests: BTreeMap<String, String>,
}

impl PipelineReport {
    /// Starts a report for `subject`.
    #[must_use]
    pub fn new(run_id: Uuid, subject: impl Into<String>) -> Self {
        Self {
            run_id,
            subject: subject.into(),
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            scene_path: None,
            digests: BTreeMap::new(),
        }
    }

    /// Names of steps that ran an external tool.
    #[must_use]
    pub fn executed_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status.executed())
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Names of steps that were skipped.
    #[must_use]
    pub fn skipped_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Skipped)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Name of the step that failed, if any.
    #[must_use]
    pub fn failed_step(&self) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| !s.status.is_success())
            .map(|s| s.name.as_str())
    }

    /// Writes the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_json(&self, path: &Path) -> Result<(), PreprocessError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
