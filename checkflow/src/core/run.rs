//! Run records and run outcomes.

use super::{RunStatus, StageResult, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The persisted record of one analysis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run id.
    pub run_id: String,
    /// Name of the pipeline that drives the run.
    pub pipeline: String,
    /// Opaque input parameters.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Overall status.
    pub status: RunStatus,
    /// When the run was first created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// Why the last invocation was cancelled, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

impl RunRecord {
    /// Creates a new pending run record.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        pipeline: impl Into<String>,
        inputs: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            pipeline: pipeline.into(),
            inputs,
            status: RunStatus::Pending,
            created_at: now,
            updated_at: now,
            cancel_reason: None,
        }
    }

    /// Updates the status and the update timestamp.
    pub fn set_status(&mut self, status: RunStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// What one invocation of a pipeline produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// The run id.
    pub run_id: String,
    /// Aggregated run status after this invocation.
    pub status: RunStatus,
    /// Per-stage status for every stage of the pipeline.
    pub stage_statuses: BTreeMap<String, StageStatus>,
    /// Current results known for the run, including checkpointed ones.
    pub results: BTreeMap<String, StageResult>,
    /// Stages executed by this invocation, in completion order.
    pub executed: Vec<String>,
    /// Stages skipped because a successful checkpoint existed.
    pub skipped: Vec<String>,
    /// Whether the invocation stopped early because of cancellation.
    pub cancelled: bool,
    /// Wall-clock duration of the invocation.
    pub duration_ms: f64,
}

impl RunOutcome {
    /// Returns the status of a stage.
    #[must_use]
    pub fn stage_status(&self, stage: &str) -> Option<StageStatus> {
        self.stage_statuses.get(stage).copied()
    }

    /// Returns the current result of a stage.
    #[must_use]
    pub fn result(&self, stage: &str) -> Option<&StageResult> {
        self.results.get(stage)
    }

    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }
}
