//! Fault-injecting artifact store.

use crate::core::{RunRecord, StageResult};
use crate::errors::PersistenceError;
use crate::store::ArtifactStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Wraps a store and fails writes for selected stages.
pub struct FailingArtifactStore {
    inner: Arc<dyn ArtifactStore>,
    failing_stages: RwLock<HashSet<String>>,
    fail_run_writes: RwLock<bool>,
}

impl std::fmt::Debug for FailingArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailingArtifactStore")
            .field("failing_stages", &*self.failing_stages.read())
            .finish_non_exhaustive()
    }
}

impl FailingArtifactStore {
    /// Wraps `inner`; no writes fail until configured.
    #[must_use]
    pub fn new(inner: Arc<dyn ArtifactStore>) -> Self {
        Self {
            inner,
            failing_stages: RwLock::new(HashSet::new()),
            fail_run_writes: RwLock::new(false),
        }
    }

    /// Makes every `put` for `stage` fail.
    #[must_use]
    pub fn failing_on(self, stage: impl Into<String>) -> Self {
        self.fail_stage(stage);
        self
    }

    /// Makes every `put` for `stage` fail.
    pub fn fail_stage(&self, stage: impl Into<String>) {
        self.failing_stages.write().insert(stage.into());
    }

    /// Makes every `put_run` fail.
    pub fn fail_run_writes(&self, fail: bool) {
        *self.fail_run_writes.write() = fail;
    }

    /// Stops injecting faults.
    pub fn heal(&self) {
        self.failing_stages.write().clear();
        *self.fail_run_writes.write() = false;
    }
}

#[async_trait]
impl ArtifactStore for FailingArtifactStore {
    async fn put(&self, result: &StageResult) -> Result<(), PersistenceError> {
        if self.failing_stages.read().contains(&result.stage) {
            return Err(PersistenceError::Unavailable(format!(
                "injected write failure for stage '{}'",
                result.stage
            )));
        }
        self.inner.put(result).await
    }

    async fn get(&self, run_id: &str, stage: &str) -> Result<Option<StageResult>, PersistenceError> {
        self.inner.get(run_id, stage).await
    }

    async fn list_completed(&self, run_id: &str) -> Result<BTreeSet<String>, PersistenceError> {
        self.inner.list_completed(run_id).await
    }

    async fn history(&self, run_id: &str, stage: &str) -> Result<Vec<StageResult>, PersistenceError> {
        self.inner.history(run_id, stage).await
    }

    async fn list_results(&self, run_id: &str) -> Result<Vec<StageResult>, PersistenceError> {
        self.inner.list_results(run_id).await
    }

    async fn put_run(&self, run: &RunRecord) -> Result<(), PersistenceError> {
        if *self.fail_run_writes.read() {
            return Err(PersistenceError::Unavailable(
                "injected write failure for run record".to_string(),
            ));
        }
        self.inner.put_run(run).await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, PersistenceError> {
        self.inner.get_run(run_id).await
    }

    async fn list_runs(&self) -> Result<Vec<RunRecord>, PersistenceError> {
        self.inner.list_runs().await
    }
}
