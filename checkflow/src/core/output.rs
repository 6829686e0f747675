//! What a stage's work hands back to the executor.

use super::StageStatus;
use serde::{Deserialize, Serialize};

/// The output of one invocation of stage work.
///
/// Only `Success`, `Partial` and `Failed` are produced by the factory
/// methods; the executor stamps run id, stage name and timing on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// The outcome status.
    pub status: StageStatus,

    /// Opaque payload (null for failures).
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Error detail for partial and failed outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StageOutput {
    /// Creates a successful output.
    #[must_use]
    pub fn success(payload: serde_json::Value) -> Self {
        Self {
            status: StageStatus::Success,
            payload,
            detail: None,
        }
    }

    /// Creates a successful output with a null payload.
    #[must_use]
    pub fn success_empty() -> Self {
        Self::success(serde_json::Value::Null)
    }

    /// Creates a partial output: usable, but some sub-items are missing.
    #[must_use]
    pub fn partial(payload: serde_json::Value, detail: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Partial,
            payload,
            detail: Some(detail.into()),
        }
    }

    /// Creates a failed output.
    #[must_use]
    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            payload: serde_json::Value::Null,
            detail: Some(detail.into()),
        }
    }

    /// Returns true if the output can feed downstream stages.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.status.is_usable()
    }
}
