//! Stage and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a stage within one run.
///
/// `Pending -> Running -> {Success, Partial, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    /// Stage has not started.
    #[default]
    Pending,
    /// Stage is currently running.
    Running,
    /// Stage completed with full output.
    Success,
    /// Stage produced usable but incomplete output.
    Partial,
    /// Stage failed or was not executed because an upstream stage failed.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Partial => write!(f, "PARTIAL"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Partial | Self::Failed)
    }

    /// Returns true if downstream stages may consume this stage's output.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Success | Self::Partial)
    }
}

/// The overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// No stage has reached a terminal state yet.
    #[default]
    Pending,
    /// Some stages are terminal, others are still pending or running.
    InProgress,
    /// All stages terminal; a mix of usable and failed outcomes.
    Partial,
    /// All stages succeeded.
    Complete,
    /// All stages failed or were unreachable.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Partial => write!(f, "PARTIAL"),
            Self::Complete => write!(f, "COMPLETE"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl RunStatus {
    /// Aggregates per-stage statuses into a run status.
    ///
    /// COMPLETE iff every stage succeeded, FAILED iff every stage failed,
    /// PARTIAL iff every stage is terminal with a mix of outcomes.
    #[must_use]
    pub fn aggregate<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = StageStatus>,
    {
        let mut total = 0usize;
        let mut success = 0usize;
        let mut failed = 0usize;
        let mut terminal = 0usize;

        for status in statuses {
            total += 1;
            match status {
                StageStatus::Success => success += 1,
                StageStatus::Failed => failed += 1,
                _ => {}
            }
            if status.is_terminal() {
                terminal += 1;
            }
        }

        if total == 0 || terminal == 0 {
            Self::Pending
        } else if terminal < total {
            Self::InProgress
        } else if success == total {
            Self::Complete
        } else if failed == total {
            Self::Failed
        } else {
            Self::Partial
        }
    }

    /// Returns true if the run will not change without a new invocation.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Partial | Self::Complete | Self::Failed)
    }
}
