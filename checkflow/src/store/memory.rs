//! In-memory artifact store.

use super::{validate_key, ArtifactStore};
use crate::core::{RunRecord, StageResult, StageStatus};
use crate::errors::PersistenceError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

/// Artifact store that keeps everything in process memory.
///
/// Durable only for the life of the process; used for tests and for runs with
/// automatic saving disabled.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    /// History per `(run id, stage)`; the last entry is the current record.
    results: RwLock<HashMap<(String, String), Vec<StageResult>>>,
    runs: RwLock<HashMap<String, RunRecord>>,
}

impl InMemoryArtifactStore {
    /// Creates a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys with at least one record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    /// Returns true if no result has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.read().is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, result: &StageResult) -> Result<(), PersistenceError> {
        validate_key(&result.run_id)?;
        validate_key(&result.stage)?;

        self.results
            .write()
            .entry((result.run_id.clone(), result.stage.clone()))
            .or_default()
            .push(result.clone());
        Ok(())
    }

    async fn get(&self, run_id: &str, stage: &str) -> Result<Option<StageResult>, PersistenceError> {
        Ok(self
            .results
            .read()
            .get(&(run_id.to_string(), stage.to_string()))
            .and_then(|history| history.last().cloned()))
    }

    async fn list_completed(&self, run_id: &str) -> Result<BTreeSet<String>, PersistenceError> {
        Ok(self
            .results
            .read()
            .iter()
            .filter(|((run, _), history)| {
                run == run_id
                    && history
                        .last()
                        .is_some_and(|r| r.status == StageStatus::Success)
            })
            .map(|((_, stage), _)| stage.clone())
            .collect())
    }

    async fn history(&self, run_id: &str, stage: &str) -> Result<Vec<StageResult>, PersistenceError> {
        Ok(self
            .results
            .read()
            .get(&(run_id.to_string(), stage.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_results(&self, run_id: &str) -> Result<Vec<StageResult>, PersistenceError> {
        let mut current: Vec<StageResult> = self
            .results
            .read()
            .iter()
            .filter(|((run, _), _)| run == run_id)
            .filter_map(|(_, history)| history.last().cloned())
            .collect();
        current.sort_by(|a, b| a.stage.cmp(&b.stage));
        Ok(current)
    }

    async fn put_run(&self, run: &RunRecord) -> Result<(), PersistenceError> {
        validate_key(&run.run_id)?;
        self.runs.write().insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, PersistenceError> {
        Ok(self.runs.read().get(run_id).cloned())
    }

    async fn list_runs(&self) -> Result<Vec<RunRecord>, PersistenceError> {
        let mut runs: Vec<RunRecord> = self.runs.read().values().cloned().collect();
        runs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = InMemoryArtifactStore::new();
        assert!(store.get("r1", "a").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_put_overwrites_current_and_keeps_history() {
        let store = InMemoryArtifactStore::new();
        store
            .put(&StageResult::failed("r1", "a", ErrorKind::StageTimeout, "slow"))
            .await
            .unwrap();
        store
            .put(&StageResult::success("r1", "a", json!(2)).with_attempt(2))
            .await
            .unwrap();

        let current = store.get("r1", "a").await.unwrap().unwrap();
        assert_eq!(current.status, StageStatus::Success);
        assert_eq!(current.attempt, 2);

        let history = store.history("r1", "a").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, StageStatus::Failed);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_list_completed_only_counts_current_success() {
        let store = InMemoryArtifactStore::new();
        store.put(&StageResult::success("r1", "a", json!(null))).await.unwrap();
        store
            .put(&StageResult::partial("r1", "b", json!(null), "half"))
            .await
            .unwrap();
        store.put(&StageResult::success("r1", "c", json!(null))).await.unwrap();
        store
            .put(&StageResult::failed("r1", "c", ErrorKind::StageWorkError, "rerun broke"))
            .await
            .unwrap();
        store.put(&StageResult::success("r2", "d", json!(null))).await.unwrap();

        let completed = store.list_completed("r1").await.unwrap();
        assert_eq!(completed.into_iter().collect::<Vec<_>>(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_list_results_sorted_by_stage() {
        let store = InMemoryArtifactStore::new();
        store.put(&StageResult::success("r1", "b", json!(null))).await.unwrap();
        store.put(&StageResult::success("r1", "a", json!(null))).await.unwrap();

        let stages: Vec<String> = store
            .list_results("r1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.stage)
            .collect();
        assert_eq!(stages, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_run_records() {
        let store = InMemoryArtifactStore::new();
        let record = RunRecord::new("r1", "report", BTreeMap::new());
        store.put_run(&record).await.unwrap();

        assert_eq!(store.get_run("r1").await.unwrap(), Some(record));
        assert_eq!(store.list_runs().await.unwrap().len(), 1);
        assert!(store.get_run("r2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let store = InMemoryArtifactStore::new();
        let err = store
            .put(&StageResult::success("../escape", "a", json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidKey { .. }));
    }
}
