//! Persisted stage results.

use super::{StageOutput, StageStatus};
use crate::errors::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error detail attached to partial and failed results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl StageError {
    /// Creates a new stage error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The recorded outcome of one stage attempt for one run.
///
/// `error` is present iff `status` is `Failed` or `Partial`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// The run this result belongs to.
    pub run_id: String,
    /// The stage name.
    pub stage: String,
    /// Outcome status.
    pub status: StageStatus,
    /// Opaque payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Error detail for failed and partial results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    /// 1-based attempt number; 0 when the stage was never executed.
    #[serde(default)]
    pub attempt: u32,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// When the attempt completed.
    pub completed_at: DateTime<Utc>,
}

impl StageResult {
    fn base(run_id: &str, stage: &str, status: StageStatus) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            stage: stage.to_string(),
            status,
            payload: serde_json::Value::Null,
            error: None,
            attempt: 1,
            started_at: now,
            completed_at: now,
        }
    }

    /// Creates a successful result.
    #[must_use]
    pub fn success(run_id: &str, stage: &str, payload: serde_json::Value) -> Self {
        Self {
            payload,
            ..Self::base(run_id, stage, StageStatus::Success)
        }
    }

    /// Creates a partial result.
    #[must_use]
    pub fn partial(
        run_id: &str,
        stage: &str,
        payload: serde_json::Value,
        message: impl Into<String>,
    ) -> Self {
        Self {
            payload,
            error: Some(StageError::new(ErrorKind::Incomplete, message)),
            ..Self::base(run_id, stage, StageStatus::Partial)
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(run_id: &str, stage: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: Some(StageError::new(kind, message)),
            ..Self::base(run_id, stage, StageStatus::Failed)
        }
    }

    /// Creates the marker recorded for a stage skipped because an upstream failed.
    #[must_use]
    pub fn upstream_failed(run_id: &str, stage: &str, upstream: &str) -> Self {
        let mut result = Self::failed(
            run_id,
            stage,
            ErrorKind::UpstreamFailed,
            format!("upstream stage '{upstream}' failed"),
        );
        result.attempt = 0;
        result
    }

    /// Builds a result from the output returned by stage work.
    ///
    /// A `Failed` or `Partial` output without detail gets a generic message
    /// so the error-detail invariant holds. Non-terminal statuses returned by
    /// work are treated as work errors.
    #[must_use]
    pub fn from_output(run_id: &str, stage: &str, output: StageOutput) -> Self {
        match output.status {
            StageStatus::Success => Self::success(run_id, stage, output.payload),
            StageStatus::Partial => Self::partial(
                run_id,
                stage,
                output.payload,
                output
                    .detail
                    .unwrap_or_else(|| "stage reported partial output".to_string()),
            ),
            StageStatus::Failed => Self::failed(
                run_id,
                stage,
                ErrorKind::StageWorkError,
                output
                    .detail
                    .unwrap_or_else(|| "stage reported failure".to_string()),
            ),
            other => Self::failed(
                run_id,
                stage,
                ErrorKind::StageWorkError,
                format!("stage returned non-terminal status {other}"),
            ),
        }
    }

    /// Sets the attempt number.
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Sets the start timestamp.
    #[must_use]
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Returns the error kind, if any.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Returns true if downstream stages may consume this result.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.status.is_usable()
    }

    /// Returns the attempt duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}
