//! Step status enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Every declared output was already present and fresh.
    Skipped,
    /// Step executed and published all declared outputs.
    Completed,
    /// Step executed and failed.
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => write!(f, "skipped"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StepStatus {
    /// Returns true if the step's outputs can be relied on.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Skipped | Self::Completed)
    }

    /// Returns true if an external tool was run for the step.
    #[must_use]
    pub fn executed(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}
