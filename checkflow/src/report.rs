//! Run status reports.

use crate::core::{RunStatus, StageError, StageStatus};
use crate::errors::PersistenceError;
use crate::pipeline::StageGraph;
use crate::store::ArtifactStore;
use crate::utils::format_timestamp;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Status of one stage within a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    /// Stage name.
    pub stage: String,
    /// Current status.
    pub status: StageStatus,
    /// Attempt number of the current result; 0 if never executed.
    pub attempt: u32,
    /// Error detail of the current result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    /// When the current result was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Stage counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    /// Stages whose current result is `SUCCESS`.
    pub succeeded: usize,
    /// Stages whose current result is `PARTIAL`.
    pub partial: usize,
    /// Stages whose current result is `FAILED`.
    pub failed: usize,
    /// Stages with no terminal result.
    pub pending: usize,
}

impl StageCounts {
    fn add(&mut self, status: StageStatus) {
        match status {
            StageStatus::Success => self.succeeded += 1,
            StageStatus::Partial => self.partial += 1,
            StageStatus::Failed => self.failed += 1,
            StageStatus::Pending | StageStatus::Running => self.pending += 1,
        }
    }

    /// Total number of stages counted.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded + self.partial + self.failed + self.pending
    }
}

/// Overall and per-stage status of a persisted run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Run id.
    pub run_id: String,
    /// Pipeline name.
    pub pipeline: String,
    /// Overall status as last recorded.
    pub status: RunStatus,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// When the run record was last written.
    pub updated_at: DateTime<Utc>,
    /// Why the last invocation was cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// Per-stage status.
    pub stages: Vec<StageReport>,
    /// False when no graph was available, so stages that never recorded a
    /// result are missing from `stages` and `counts`.
    pub stages_from_graph: bool,
    /// Stage counts by status.
    pub counts: StageCounts,
}

impl RunReport {
    /// Builds the report of a run from the store.
    ///
    /// With a `graph`, stages are listed in declaration order and stages
    /// that never produced a result appear as `PENDING`; stored results for
    /// stages the graph does not know are appended. Without a graph only
    /// stored results are listed, sorted by stage name.
    ///
    /// Returns `None` if the run has no record.
    ///
    /// # Errors
    ///
    /// Returns a `PersistenceError` if the store cannot be read.
    pub async fn load(
        store: &dyn ArtifactStore,
        run_id: &str,
        graph: Option<&StageGraph>,
    ) -> Result<Option<Self>, PersistenceError> {
        let Some(record) = store.get_run(run_id).await? else {
            return Ok(None);
        };

        let mut stored: HashMap<String, StageReport> = store
            .list_results(run_id)
            .await?
            .into_iter()
            .map(|result| {
                let report = StageReport {
                    stage: result.stage.clone(),
                    status: result.status,
                    attempt: result.attempt,
                    error: result.error,
                    completed_at: Some(result.completed_at),
                };
                (result.stage, report)
            })
            .collect();

        let mut stages = Vec::with_capacity(stored.len());
        if let Some(graph) = graph {
            for name in graph.stage_names() {
                let report = stored.remove(name).unwrap_or_else(|| StageReport {
                    stage: name.clone(),
                    status: StageStatus::Pending,
                    attempt: 0,
                    error: None,
                    completed_at: None,
                });
                stages.push(report);
            }
        }
        let mut extra: Vec<StageReport> = stored.into_values().collect();
        extra.sort_by(|a, b| a.stage.cmp(&b.stage));
        stages.extend(extra);

        let mut counts = StageCounts::default();
        for stage in &stages {
            counts.add(stage.status);
        }

        Ok(Some(Self {
            run_id: record.run_id,
            pipeline: record.pipeline,
            status: record.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
            cancel_reason: record.cancel_reason,
            stages,
            stages_from_graph: graph.is_some(),
            counts,
        }))
    }

    /// Returns the report entry for a stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == name)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {} ({})", self.run_id, self.pipeline)?;
        writeln!(f, "status: {}", self.status)?;
        writeln!(f, "updated: {}", format_timestamp(&self.updated_at))?;
        if let Some(reason) = &self.cancel_reason {
            writeln!(f, "cancelled: {reason}")?;
        }
        for stage in &self.stages {
            write!(
                f,
                "  {:<24} {:<8} attempt {}",
                stage.stage,
                stage.status.to_string(),
                stage.attempt
            )?;
            if let Some(error) = &stage.error {
                write!(f, "  {error}")?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "{} succeeded, {} partial, {} failed, {} pending",
            self.counts.succeeded, self.counts.partial, self.counts.failed, self.counts.pending
        )?;
        if !self.stages_from_graph {
            write!(f, "\n(only stages with recorded results are listed)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunRecord, StageResult};
    use crate::errors::ErrorKind;
    use crate::pipeline::PipelineBuilder;
    use crate::stages::NoOpStage;
    use crate::store::InMemoryArtifactStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn graph() -> StageGraph {
        PipelineBuilder::new("report")
            .stage("A", Arc::new(NoOpStage), &[])
            .unwrap()
            .stage("B", Arc::new(NoOpStage), &[])
            .unwrap()
            .stage("C", Arc::new(NoOpStage), &["A", "B"])
            .unwrap()
            .build()
            .unwrap()
    }

    async fn seeded() -> InMemoryArtifactStore {
        let store = InMemoryArtifactStore::new();
        let mut record = RunRecord::new("r1", "report", BTreeMap::new());
        record.set_status(RunStatus::InProgress);
        store.put_run(&record).await.unwrap();
        store.put(&StageResult::success("r1", "A", json!(1))).await.unwrap();
        store
            .put(&StageResult::failed("r1", "B", ErrorKind::StageTimeout, "slow").with_attempt(2))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let store = InMemoryArtifactStore::new();
        assert!(RunReport::load(&store, "nope", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_graph_stages_without_results_are_pending() {
        let store = seeded().await;
        let graph = graph();
        let report = RunReport::load(&store, "r1", Some(&graph)).await.unwrap().unwrap();

        let names: Vec<&str> = report.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(report.status, RunStatus::InProgress);
        assert_eq!(report.stage("B").unwrap().attempt, 2);
        assert_eq!(
            report.stage("B").unwrap().error.as_ref().map(|e| e.kind),
            Some(ErrorKind::StageTimeout)
        );
        assert_eq!(report.stage("C").unwrap().status, StageStatus::Pending);
        assert!(report.stages_from_graph);
        assert_eq!(
            report.counts,
            StageCounts {
                succeeded: 1,
                partial: 0,
                failed: 1,
                pending: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_without_graph_lists_stored_results() {
        let store = seeded().await;
        let report = RunReport::load(&store, "r1", None).await.unwrap().unwrap();
        assert_eq!(report.counts.total(), 2);
        assert!(report.stage("C").is_none());
        assert!(!report.stages_from_graph);
        assert!(report
            .to_string()
            .ends_with("(only stages with recorded results are listed)"));
    }

    #[tokio::test]
    async fn test_serializes_to_json() {
        let store = seeded().await;
        let report = RunReport::load(&store, "r1", None).await.unwrap().unwrap();
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], json!("IN_PROGRESS"));
        assert_eq!(value["stages"][1]["error"]["kind"], json!("STAGE_TIMEOUT"));
        assert_eq!(value["counts"]["failed"], json!(1));
    }

    #[test]
    fn test_display_lists_stages() {
        let now = Utc::now();
        let report = RunReport {
            run_id: "r1".into(),
            pipeline: "report".into(),
            status: RunStatus::Complete,
            created_at: now,
            updated_at: now,
            cancel_reason: None,
            stages: vec![StageReport {
                stage: "A".into(),
                status: StageStatus::Success,
                attempt: 1,
                error: None,
                completed_at: Some(now),
            }],
            stages_from_graph: true,
            counts: StageCounts {
                succeeded: 1,
                ..StageCounts::default()
            },
        };
        let text = report.to_string();
        assert!(text.contains("status: COMPLETE"));
        assert!(text.contains("SUCCESS"));
        assert!(text.ends_with("1 succeeded, 0 partial, 0 failed, 0 pending"));
    }
}
