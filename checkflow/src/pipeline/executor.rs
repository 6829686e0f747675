//! Single-stage execution inside a failure boundary.

use super::{RetryDecision, StageDefinition};
use crate::context::StageInputs;
use crate::core::{StageResult, StageStatus};
use crate::errors::{ErrorKind, PersistenceError};
use crate::events::{EventSink, NoOpEventSink};
use crate::store::ArtifactStore;
use chrono::Utc;
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

/// Default per-attempt timeout.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(600);

/// Runs one stage: applies the timeout, captures errors and panics, retries
/// idempotent stages, and persists every attempt.
///
/// `execute` never fails; every outcome, including a failure to persist, is
/// expressed as a [`StageResult`].
pub struct StageExecutor {
    store: Arc<dyn ArtifactStore>,
    events: Arc<dyn EventSink>,
    default_timeout: Duration,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl StageExecutor {
    /// Creates an executor persisting into `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            events: Arc::new(NoOpEventSink),
            default_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the timeout used by stages that do not define their own.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Returns the timeout used by stages that do not define their own.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Executes a stage to a terminal result.
    pub async fn execute(&self, def: &StageDefinition, inputs: &StageInputs) -> StageResult {
        let run_id = inputs.run_id();
        let budget = def.attempt_budget();
        let mut attempt = 1;

        loop {
            debug!(run_id, stage = %def.name, attempt, "Starting stage attempt");
            self.events.try_emit(
                "stage.started",
                Some(json!({"run_id": run_id, "stage": &def.name, "attempt": attempt})),
            );

            let result = self.run_attempt(def, inputs, attempt).await;

            if let Err(err) = self.store.put(&result).await {
                return self.persistence_failure(&result, &err);
            }

            match result.status {
                StageStatus::Success => {
                    info!(run_id, stage = %def.name, attempt, duration_ms = result.duration_ms(), "Stage completed");
                    self.events.try_emit(
                        "stage.completed",
                        Some(json!({
                            "run_id": run_id,
                            "stage": &def.name,
                            "attempt": attempt,
                            "duration_ms": result.duration_ms(),
                        })),
                    );
                    return result;
                }
                StageStatus::Partial => {
                    warn!(run_id, stage = %def.name, attempt, error = ?result.error, "Stage produced partial output");
                    self.events.try_emit(
                        "stage.partial",
                        Some(json!({
                            "run_id": run_id,
                            "stage": &def.name,
                            "attempt": attempt,
                            "error": &result.error,
                        })),
                    );
                    return result;
                }
                _ => {}
            }

            let decision = if attempt < budget {
                def.retry.decide(attempt)
            } else {
                RetryDecision::GiveUp
            };

            match decision {
                RetryDecision::Retry(delay) => {
                    warn!(
                        run_id,
                        stage = %def.name,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = ?result.error,
                        "Stage attempt failed, retrying"
                    );
                    self.events.try_emit(
                        "stage.retrying",
                        Some(json!({
                            "run_id": run_id,
                            "stage": &def.name,
                            "attempt": attempt,
                            "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "error": &result.error,
                        })),
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => {
                    warn!(run_id, stage = %def.name, attempt, error = ?result.error, "Stage failed");
                    self.events.try_emit(
                        "stage.failed",
                        Some(json!({
                            "run_id": run_id,
                            "stage": &def.name,
                            "attempt": attempt,
                            "error": &result.error,
                        })),
                    );
                    return result;
                }
            }
        }
    }

    /// Persists the marker for a stage that was failed without running.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the marker could not be written.
    pub async fn record_unexecuted(&self, result: &StageResult) -> Result<(), PersistenceError> {
        self.store.put(result).await?;
        self.events.try_emit(
            "stage.upstream_failed",
            Some(json!({
                "run_id": &result.run_id,
                "stage": &result.stage,
                "error": &result.error,
            })),
        );
        Ok(())
    }

    async fn run_attempt(&self, def: &StageDefinition, inputs: &StageInputs, attempt: u32) -> StageResult {
        let run_id = inputs.run_id();
        let timeout = def.timeout.unwrap_or(self.default_timeout);
        let started_at = Utc::now();

        let work = Arc::clone(&def.work);
        let task_inputs = inputs.clone();
        let mut handle = tokio::spawn(async move { work.execute(&task_inputs).await });

        let result = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(output))) => StageResult::from_output(run_id, &def.name, output),
            Ok(Ok(Err(err))) => {
                StageResult::failed(run_id, &def.name, ErrorKind::StageWorkError, format!("{err:#}"))
            }
            Ok(Err(join_err)) => StageResult::failed(
                run_id,
                &def.name,
                ErrorKind::StageWorkError,
                join_error_message(join_err),
            ),
            Err(_) => {
                handle.abort();
                StageResult::failed(
                    run_id,
                    &def.name,
                    ErrorKind::StageTimeout,
                    format!("stage exceeded timeout of {}ms", timeout.as_millis()),
                )
            }
        };

        result.with_attempt(attempt).with_started_at(started_at)
    }

    fn persistence_failure(&self, result: &StageResult, err: &PersistenceError) -> StageResult {
        error!(
            run_id = %result.run_id,
            stage = %result.stage,
            attempt = result.attempt,
            error = %err,
            "Failed to persist stage result"
        );
        let failed = StageResult::failed(
            &result.run_id,
            &result.stage,
            ErrorKind::PersistenceError,
            format!("failed to persist result: {err}"),
        )
        .with_attempt(result.attempt)
        .with_started_at(result.started_at);

        self.events.try_emit(
            "stage.failed",
            Some(json!({
                "run_id": &failed.run_id,
                "stage": &failed.stage,
                "attempt": failed.attempt,
                "error": &failed.error,
            })),
        );
        failed
    }
}

fn join_error_message(err: JoinError) -> String {
    if err.is_panic() {
        format!("stage panicked: {}", panic_message(&*err.into_panic()))
    } else {
        "stage task was cancelled".to_string()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunRecord, StageOutput};
    use crate::events::CollectingEventSink;
    use crate::pipeline::RetryPolicy;
    use crate::stages::{FnStage, Stage};
    use crate::store::InMemoryArtifactStore;
    use crate::testing::{FlakyStage, PanickingStage, SlowStage};
    use async_trait::async_trait;
    use mockall::mock;
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeMap, BTreeSet};

    mock! {
        pub Store {}

        #[async_trait]
        impl ArtifactStore for Store {
            async fn put(&self, result: &StageResult) -> Result<(), PersistenceError>;
            async fn get(&self, run_id: &str, stage: &str) -> Result<Option<StageResult>, PersistenceError>;
            async fn list_completed(&self, run_id: &str) -> Result<BTreeSet<String>, PersistenceError>;
            async fn history(&self, run_id: &str, stage: &str) -> Result<Vec<StageResult>, PersistenceError>;
            async fn list_results(&self, run_id: &str) -> Result<Vec<StageResult>, PersistenceError>;
            async fn put_run(&self, run: &RunRecord) -> Result<(), PersistenceError>;
            async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, PersistenceError>;
            async fn list_runs(&self) -> Result<Vec<RunRecord>, PersistenceError>;
        }
    }

    fn inputs(stage: &str) -> StageInputs {
        StageInputs::root("r1", stage, BTreeMap::new())
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::new().with_max_attempts(attempts).with_base_delay_ms(1)
    }

    fn def(name: &str, work: Arc<dyn Stage>) -> StageDefinition {
        StageDefinition::new(name, work)
    }

    #[tokio::test]
    async fn test_success_is_persisted() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let executor = StageExecutor::new(store.clone());
        let stage = FnStage::new("ok", |_: &StageInputs| -> anyhow::Result<StageOutput> {
            Ok(StageOutput::success(json!({"leads": 3})))
        });

        let result = executor.execute(&def("a", Arc::new(stage)), &inputs("a")).await;

        assert_eq!(result.status, StageStatus::Success);
        assert_eq!(result.attempt, 1);
        assert_eq!(store.get("r1", "a").await.unwrap(), Some(result));
    }

    #[tokio::test]
    async fn test_error_becomes_work_error() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let executor = StageExecutor::new(store);
        let stage = FnStage::new("err", |_: &StageInputs| -> anyhow::Result<StageOutput> {
            anyhow::bail!("provider quota exceeded")
        });

        let result = executor.execute(&def("a", Arc::new(stage)), &inputs("a")).await;

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.error_kind(), Some(ErrorKind::StageWorkError));
        assert!(result.error.unwrap().message.contains("quota"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let executor = StageExecutor::new(Arc::new(InMemoryArtifactStore::new()));
        let result = executor
            .execute(&def("a", Arc::new(PanickingStage::new("kaboom"))), &inputs("a"))
            .await;

        assert_eq!(result.error_kind(), Some(ErrorKind::StageWorkError));
        assert!(result.error.unwrap().message.contains("kaboom"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let executor = StageExecutor::new(Arc::new(InMemoryArtifactStore::new()));
        let slow = def("a", Arc::new(SlowStage::new(Duration::from_secs(30))))
            .with_timeout(Duration::from_millis(20));

        let result = executor.execute(&slow, &inputs("a")).await;

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.error_kind(), Some(ErrorKind::StageTimeout));
    }

    #[tokio::test]
    async fn test_default_timeout_applies() {
        let executor = StageExecutor::new(Arc::new(InMemoryArtifactStore::new()))
            .with_default_timeout(Duration::from_millis(20));
        let result = executor
            .execute(&def("a", Arc::new(SlowStage::new(Duration::from_secs(30)))), &inputs("a"))
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::StageTimeout));
    }

    #[tokio::test]
    async fn test_idempotent_stage_retries_until_success() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let events = Arc::new(CollectingEventSink::new());
        let executor = StageExecutor::new(store.clone()).with_event_sink(events.clone());
        let flaky = Arc::new(FlakyStage::new(2, json!("done")));

        let stage = def("a", flaky.clone()).idempotent().with_retry(fast_retry(3));
        let result = executor.execute(&stage, &inputs("a")).await;

        assert_eq!(result.status, StageStatus::Success);
        assert_eq!(result.attempt, 3);
        assert_eq!(flaky.calls(), 3);
        assert_eq!(store.history("r1", "a").await.unwrap().len(), 3);
        assert_eq!(
            events.stage_event_types("a"),
            vec![
                "stage.started",
                "stage.retrying",
                "stage.started",
                "stage.retrying",
                "stage.started",
                "stage.completed"
            ]
        );
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let executor = StageExecutor::new(store.clone());
        let flaky = Arc::new(FlakyStage::new(5, json!(null)));

        let stage = def("a", flaky.clone()).idempotent().with_retry(fast_retry(2));
        let result = executor.execute(&stage, &inputs("a")).await;

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.attempt, 2);
        assert_eq!(flaky.calls(), 2);
    }

    #[tokio::test]
    async fn test_non_idempotent_stage_runs_once() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let executor = StageExecutor::new(store.clone());
        let flaky = Arc::new(FlakyStage::new(1, json!(null)));

        let stage = def("a", flaky.clone()).with_retry(fast_retry(5));
        let result = executor.execute(&stage, &inputs("a")).await;

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(flaky.calls(), 1);
        assert_eq!(store.history("r1", "a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_is_not_retried() {
        let executor = StageExecutor::new(Arc::new(InMemoryArtifactStore::new()));
        let stage = FnStage::new("partial", |_: &StageInputs| -> anyhow::Result<StageOutput> {
            Ok(StageOutput::partial(json!(["a"]), "1 of 2 sources failed"))
        });
        let stage = def("a", Arc::new(stage)).idempotent().with_retry(fast_retry(3));

        let result = executor.execute(&stage, &inputs("a")).await;
        assert_eq!(result.status, StageStatus::Partial);
        assert_eq!(result.attempt, 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_surfaces_as_failed_result() {
        let mut store = MockStore::new();
        store
            .expect_put()
            .times(1)
            .returning(|_| Err(PersistenceError::Unavailable("disk full".to_string())));

        let executor = StageExecutor::new(Arc::new(store));
        let flaky = Arc::new(FlakyStage::new(0, json!(1)));
        let stage = def("a", flaky).idempotent().with_retry(fast_retry(3));

        let result = executor.execute(&stage, &inputs("a")).await;

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.error_kind(), Some(ErrorKind::PersistenceError));
        assert!(result.error.unwrap().message.contains("disk full"));
    }

    #[tokio::test]
    async fn test_record_unexecuted() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let events = Arc::new(CollectingEventSink::new());
        let executor = StageExecutor::new(store.clone()).with_event_sink(events.clone());

        let marker = StageResult::upstream_failed("r1", "report", "research");
        executor.record_unexecuted(&marker).await.unwrap();

        assert_eq!(store.get("r1", "report").await.unwrap(), Some(marker));
        assert_eq!(events.event_types(), vec!["stage.upstream_failed"]);
    }
}
