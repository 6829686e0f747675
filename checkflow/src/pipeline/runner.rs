//! Pipeline execution with checkpoint resumption.
//!
//! Stages run as soon as every planned dependency is usable, bounded by a
//! worker pool. Results are persisted by the executor before dependents are
//! scheduled, so a crash at any point leaves a resumable run behind.

use super::{ForceRerun, RecoveryPlanner, StageExecutor, StageGraph, DEFAULT_STAGE_TIMEOUT};
use crate::cancellation::CancellationToken;
use crate::config::CheckflowConfig;
use crate::context::StageInputs;
use crate::core::{RunOutcome, RunRecord, RunStatus, StageResult, StageStatus};
use crate::errors::{
    CheckflowError, ContractErrorInfo, ErrorKind, PersistenceError, PersistenceFault,
    PipelineValidationError,
};
use crate::events::{EventSink, NoOpEventSink};
use crate::report::RunReport;
use crate::store::{validate_key, ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
use crate::utils::generate_run_id;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

/// Default number of stages allowed to run at once.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stages to rerun despite a successful checkpoint.
    pub force: ForceRerun,
    /// Token checked before each stage starts.
    pub cancellation: Option<Arc<CancellationToken>>,
}

impl RunOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the forced reruns.
    #[must_use]
    pub fn with_force(mut self, force: ForceRerun) -> Self {
        self.force = force;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// A validated stage graph bound to a store, ready to run.
pub struct Pipeline {
    graph: Arc<StageGraph>,
    store: Arc<dyn ArtifactStore>,
    events: Arc<dyn EventSink>,
    executor: Arc<StageExecutor>,
    planner: RecoveryPlanner,
    worker_pool_size: usize,
    default_timeout: Duration,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.graph.name())
            .field("stages", &self.graph.stage_names())
            .field("worker_pool_size", &self.worker_pool_size)
            .finish_non_exhaustive()
    }
}

/// Mutable bookkeeping for one invocation.
#[derive(Default)]
struct RunState {
    statuses: HashMap<String, StageStatus>,
    results: BTreeMap<String, StageResult>,
    payloads: HashMap<String, Value>,
    executed: Vec<String>,
    skipped: Vec<String>,
    /// First stage whose result could not be persisted, with the error.
    fault: Option<(String, String)>,
}

impl RunState {
    fn status(&self, stage: &str) -> StageStatus {
        self.statuses.get(stage).copied().unwrap_or_default()
    }

    fn record(&mut self, result: StageResult) {
        self.statuses.insert(result.stage.clone(), result.status);
        if result.is_usable() {
            self.payloads.insert(result.stage.clone(), result.payload.clone());
        }
        if result.error_kind() == Some(ErrorKind::PersistenceError) && self.fault.is_none() {
            let message = result
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default();
            self.fault = Some((result.stage.clone(), message));
        }
        self.results.insert(result.stage.clone(), result);
    }
}

impl Pipeline {
    /// Binds a graph to a store.
    #[must_use]
    pub fn new(graph: StageGraph, store: Arc<dyn ArtifactStore>) -> Self {
        let events: Arc<dyn EventSink> = Arc::new(NoOpEventSink);
        let executor = Arc::new(
            StageExecutor::new(store.clone())
                .with_event_sink(events.clone())
                .with_default_timeout(DEFAULT_STAGE_TIMEOUT),
        );
        Self {
            graph: Arc::new(graph),
            planner: RecoveryPlanner::new(store.clone()),
            store,
            events,
            executor,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            default_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    /// Builds a pipeline from loaded configuration.
    ///
    /// With `auto_save` enabled results go to a [`FsArtifactStore`] under
    /// `artifact_dir`; otherwise they are kept in memory. Retry settings
    /// belong to the graph, see [`PipelineBuilder::with_default_retry`] and
    /// [`CheckflowConfig::retry_policy`].
    ///
    /// [`PipelineBuilder::with_default_retry`]: super::PipelineBuilder::with_default_retry
    #[must_use]
    pub fn from_config(graph: StageGraph, config: &CheckflowConfig) -> Self {
        let store: Arc<dyn ArtifactStore> = if config.auto_save {
            Arc::new(FsArtifactStore::new(config.artifact_dir.clone()))
        } else {
            Arc::new(InMemoryArtifactStore::new())
        };
        Self::new(graph, store)
            .with_worker_pool_size(config.worker_pool_size)
            .with_default_timeout(config.stage_timeout())
    }

    /// Sets the event sink used by the pipeline and its executor.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self.rebuild_executor();
        self
    }

    /// Sets how many stages may run at once. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size.max(1);
        self
    }

    /// Sets the timeout for stages that do not define their own.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self.rebuild_executor();
        self
    }

    fn rebuild_executor(&mut self) {
        self.executor = Arc::new(
            StageExecutor::new(self.store.clone())
                .with_event_sink(self.events.clone())
                .with_default_timeout(self.default_timeout),
        );
    }

    /// Returns the stage graph.
    #[must_use]
    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Returns the artifact store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Returns the worker pool size.
    #[must_use]
    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size
    }

    /// Returns the stages an invocation would execute, without running them.
    ///
    /// # Errors
    ///
    /// Returns a configuration or persistence error.
    pub async fn plan(&self, run_id: &str, force: &ForceRerun) -> Result<Vec<String>, CheckflowError> {
        self.planner.plan(run_id, &self.graph, force).await
    }

    /// Runs (or resumes) `run_id`, skipping successfully checkpointed stages.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::run_with`].
    pub async fn run(
        &self,
        run_id: &str,
        inputs: BTreeMap<String, String>,
    ) -> Result<RunOutcome, CheckflowError> {
        self.run_with(run_id, inputs, RunOptions::default()).await
    }

    /// Starts a new run under a freshly generated id.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::run_with`].
    pub async fn start(&self, inputs: BTreeMap<String, String>) -> Result<RunOutcome, CheckflowError> {
        let run_id = generate_run_id();
        self.run_with(&run_id, inputs, RunOptions::default()).await
    }

    /// Resumes an existing run with the inputs it was created with.
    ///
    /// # Errors
    ///
    /// Returns `RunNotFound` if no run record exists, a configuration error
    /// if the run belongs to another pipeline, and otherwise see
    /// [`Pipeline::run_with`].
    pub async fn resume(&self, run_id: &str, options: RunOptions) -> Result<RunOutcome, CheckflowError> {
        let record = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| CheckflowError::RunNotFound(run_id.to_string()))?;

        if record.pipeline != self.graph.name() {
            return Err(PipelineValidationError::new(format!(
                "Run '{run_id}' belongs to pipeline '{}', not '{}'",
                record.pipeline,
                self.graph.name()
            ))
            .with_error_info(
                ContractErrorInfo::new("CONTRACT-004-PIPELINE_MISMATCH", "Run belongs to another pipeline")
                    .with_context_entry("run_id", run_id),
            )
            .into());
        }

        self.run_with(run_id, record.inputs, options).await
    }

    /// Loads the status report of a run.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store cannot be read.
    pub async fn report(&self, run_id: &str) -> Result<Option<RunReport>, CheckflowError> {
        Ok(RunReport::load(self.store.as_ref(), run_id, Some(self.graph.as_ref())).await?)
    }

    /// Runs `run_id` with explicit options.
    ///
    /// Stage failures never surface here; they are recorded in the returned
    /// [`RunOutcome`].
    ///
    /// # Errors
    ///
    /// - `Configuration` if the graph or forced stages are invalid.
    /// - `Persistence` if the run record or a checkpoint cannot be read or
    ///   written outside a stage attempt.
    /// - `PersistenceFault` if a stage result could not be persisted; no new
    ///   stages are started and the partial outcome is attached.
    pub async fn run_with(
        &self,
        run_id: &str,
        inputs: BTreeMap<String, String>,
        options: RunOptions,
    ) -> Result<RunOutcome, CheckflowError> {
        let started = Instant::now();
        validate_key(run_id)?;

        let plan = self.planner.plan(run_id, &self.graph, &options.force).await?;
        let planned: HashSet<&str> = plan.iter().map(String::as_str).collect();

        let mut record = match self.store.get_run(run_id).await? {
            Some(mut existing) => {
                existing.inputs = inputs;
                existing.cancel_reason = None;
                existing
            }
            None => RunRecord::new(run_id, self.graph.name(), inputs),
        };
        record.set_status(RunStatus::InProgress);
        self.store.put_run(&record).await?;

        let mut state = RunState::default();
        self.load_checkpoints(run_id, &planned, &mut state).await?;

        info!(
            run_id,
            pipeline = self.graph.name(),
            planned = plan.len(),
            skipped = state.skipped.len(),
            "Starting pipeline run"
        );
        self.events.try_emit(
            "pipeline.started",
            Some(json!({
                "run_id": run_id,
                "pipeline": self.graph.name(),
                "planned": &plan,
                "skipped": &state.skipped,
            })),
        );

        let params = Arc::new(record.inputs.clone());
        let cancelled = self
            .drive(run_id, &plan, &planned, &params, options.cancellation.as_deref(), &mut state)
            .await;

        let status = RunStatus::aggregate(
            self.graph.stage_names().iter().map(|stage| state.status(stage)),
        );
        let cancel_reason = if cancelled {
            options
                .cancellation
                .as_ref()
                .and_then(|token| token.reason())
                .or_else(|| Some("cancelled".to_string()))
        } else {
            None
        };

        record.cancel_reason = cancel_reason.clone();
        record.set_status(status);
        let record_write = self.store.put_run(&record).await;

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let outcome = RunOutcome {
            run_id: run_id.to_string(),
            status,
            stage_statuses: self
                .graph
                .stage_names()
                .iter()
                .map(|stage| (stage.clone(), state.status(stage)))
                .collect(),
            results: std::mem::take(&mut state.results),
            executed: std::mem::take(&mut state.executed),
            skipped: std::mem::take(&mut state.skipped),
            cancelled,
            duration_ms,
        };

        if let Some((stage, message)) = state.fault {
            error!(run_id, stage = %stage, error = %message, "Run stopped by persistence fault");
            self.events.try_emit(
                "pipeline.completed",
                Some(json!({"run_id": run_id, "status": status, "fault": &message})),
            );
            return Err(CheckflowError::PersistenceFault(Box::new(PersistenceFault {
                run_id: run_id.to_string(),
                stage,
                message,
                outcome,
            })));
        }
        record_write?;

        if cancelled {
            warn!(run_id, reason = ?cancel_reason, status = %status, "Pipeline run cancelled");
            self.events.try_emit(
                "pipeline.cancelled",
                Some(json!({"run_id": run_id, "status": status, "reason": cancel_reason})),
            );
        } else {
            info!(run_id, status = %status, executed = outcome.executed.len(), duration_ms, "Pipeline run finished");
            self.events.try_emit(
                "pipeline.completed",
                Some(json!({
                    "run_id": run_id,
                    "status": status,
                    "executed": outcome.executed.len(),
                    "skipped": outcome.skipped.len(),
                    "duration_ms": duration_ms,
                })),
            );
        }
        Ok(outcome)
    }

    /// Loads the successful checkpoints of every stage that is not planned.
    async fn load_checkpoints(
        &self,
        run_id: &str,
        planned: &HashSet<&str>,
        state: &mut RunState,
    ) -> Result<(), PersistenceError> {
        for stage in self.graph.stage_names() {
            if planned.contains(stage.as_str()) {
                state.statuses.insert(stage.clone(), StageStatus::Pending);
                continue;
            }

            let checkpoint = self
                .store
                .get(run_id, stage)
                .await?
                .filter(|result| result.status == StageStatus::Success)
                .ok_or_else(|| PersistenceError::MissingCheckpoint {
                    run_id: run_id.to_string(),
                    stage: stage.clone(),
                })?;

            debug!(run_id, stage = %stage, "Skipping stage with successful checkpoint");
            self.events.try_emit("stage.skipped", Some(json!({"run_id": run_id, "stage": stage})));
            state.record(checkpoint);
            state.skipped.push(stage.clone());
        }
        Ok(())
    }

    /// Schedules planned stages until nothing more can run. Returns true if
    /// cancellation left planned stages unstarted.
    async fn drive(
        &self,
        run_id: &str,
        plan: &[String],
        planned: &HashSet<&str>,
        params: &Arc<BTreeMap<String, String>>,
        cancellation: Option<&CancellationToken>,
        state: &mut RunState,
    ) -> bool {
        let position: HashMap<&str, usize> = plan
            .iter()
            .enumerate()
            .map(|(i, stage)| (stage.as_str(), i))
            .collect();

        let mut waiting_on: HashMap<&str, usize> = HashMap::new();
        for stage in plan {
            let deps = self.graph.definition(stage).map_or(0, |def| {
                def.dependencies
                    .iter()
                    .filter(|d| planned.contains(d.as_str()))
                    .count()
            });
            waiting_on.insert(stage.as_str(), deps);
        }

        let mut ready: BTreeSet<usize> = waiting_on
            .iter()
            .filter(|(_, &count)| count == 0)
            .filter_map(|(stage, _)| position.get(stage).copied())
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.worker_pool_size));
        let mut in_flight: FuturesUnordered<BoxFuture<'static, (String, Result<StageResult, JoinError>)>> =
            FuturesUnordered::new();
        let mut cancel_seen = false;

        loop {
            while state.fault.is_none() {
                if cancellation.is_some_and(CancellationToken::is_cancelled) {
                    cancel_seen = true;
                    break;
                }
                let Some(&index) = ready.first() else { break };
                let Ok(permit) = semaphore.clone().try_acquire_owned() else { break };
                ready.remove(&index);

                let stage = plan[index].clone();
                if state.status(&stage) != StageStatus::Pending {
                    continue;
                }
                let Some(def) = self.graph.definition(&stage).cloned() else {
                    continue;
                };

                let upstream: HashMap<String, Value> = def
                    .dependencies
                    .iter()
                    .filter_map(|dep| state.payloads.get(dep).map(|p| (dep.clone(), p.clone())))
                    .collect();
                let inputs = StageInputs::new(
                    run_id,
                    &stage,
                    params.clone(),
                    upstream,
                    def.dependencies.iter().cloned(),
                );

                debug!(run_id, stage = %stage, in_flight = in_flight.len() + 1, "Scheduling stage");
                state.statuses.insert(stage.clone(), StageStatus::Running);

                let executor = self.executor.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    executor.execute(&def, &inputs).await
                });
                in_flight.push(async move { (stage, handle.await) }.boxed());
            }

            let Some((stage, joined)) = in_flight.next().await else {
                break;
            };

            let result = match joined {
                Ok(result) => result,
                Err(err) => self.recover_join_error(run_id, &stage, &err).await,
            };
            state.executed.push(stage.clone());
            let status = result.status;
            state.record(result);

            if status.is_usable() {
                for child in self.graph.dependents(&stage) {
                    if let Some(count) = waiting_on.get_mut(child) {
                        *count = count.saturating_sub(1);
                        if *count == 0 && state.status(child) == StageStatus::Pending {
                            if let Some(&index) = position.get(child) {
                                ready.insert(index);
                            }
                        }
                    }
                }
            } else if state.fault.is_none() {
                self.fail_downstream(run_id, &stage, plan, state).await;
            }
        }

        cancel_seen
            && plan
                .iter()
                .any(|stage| state.status(stage) == StageStatus::Pending)
    }

    /// Marks every pending stage downstream of `failed` as `UPSTREAM_FAILED`.
    async fn fail_downstream(&self, run_id: &str, failed: &str, plan: &[String], state: &mut RunState) {
        let downstream = self.graph.downstream_closure([failed]);

        for stage in plan {
            if stage == failed
                || !downstream.contains(stage)
                || state.status(stage) != StageStatus::Pending
            {
                continue;
            }

            let marker = StageResult::upstream_failed(run_id, stage, failed);
            warn!(run_id, stage = %stage, upstream = failed, "Stage not run: upstream failed");

            match self.executor.record_unexecuted(&marker).await {
                Ok(()) => state.record(marker),
                Err(err) => {
                    error!(run_id, stage = %stage, error = %err, "Failed to persist upstream failure marker");
                    state.record(
                        StageResult::failed(
                            run_id,
                            stage,
                            ErrorKind::PersistenceError,
                            format!("failed to persist result: {err}"),
                        )
                        .with_attempt(0),
                    );
                    return;
                }
            }
        }
    }

    /// Turns an aborted or panicked executor task into a persisted failure.
    async fn recover_join_error(&self, run_id: &str, stage: &str, err: &JoinError) -> StageResult {
        error!(run_id, stage, error = %err, "Stage task ended abnormally");
        let result = StageResult::failed(
            run_id,
            stage,
            ErrorKind::StageWorkError,
            format!("stage task ended abnormally: {err}"),
        );
        match self.store.put(&result).await {
            Ok(()) => result,
            Err(put_err) => StageResult::failed(
                run_id,
                stage,
                ErrorKind::PersistenceError,
                format!("failed to persist result: {put_err}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::pipeline::PipelineBuilder;
    use crate::stages::Stage;
    use crate::testing::{FailingArtifactStore, FailingStage, MockStage, SlowStage};
    use crate::core::StageOutput;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Tracks how many instances run at the same time.
    #[derive(Debug, Default)]
    struct Gauge {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[derive(Debug)]
    struct GaugedStage(Arc<Gauge>);

    #[async_trait]
    impl Stage for GaugedStage {
        async fn execute(&self, _inputs: &StageInputs) -> anyhow::Result<StageOutput> {
            let now = self.0.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.0.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40)).await;
            self.0.active.fetch_sub(1, Ordering::SeqCst);
            Ok(StageOutput::success_empty())
        }
    }

    fn abc(a: Arc<dyn Stage>, b: Arc<dyn Stage>, c: Arc<dyn Stage>) -> StageGraph {
        PipelineBuilder::new("report")
            .stage("A", a, &[])
            .unwrap()
            .stage("B", b, &[])
            .unwrap()
            .stage("C", c, &["A", "B"])
            .unwrap()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_all_success_is_complete() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let c = Arc::new(MockStage::new(json!("report")));
        let pipeline = Pipeline::new(
            abc(Arc::new(MockStage::new(json!(1))), Arc::new(MockStage::new(json!(2))), c.clone()),
            store.clone(),
        );

        let outcome = pipeline.run("r1", BTreeMap::new()).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Complete);
        assert_eq!(outcome.executed.len(), 3);
        assert_eq!(outcome.executed.last().map(String::as_str), Some("C"));
        let seen = c.last_inputs().unwrap();
        assert_eq!(seen.upstream("A").unwrap(), Some(&json!(1)));
        assert_eq!(seen.upstream("B").unwrap(), Some(&json!(2)));
        assert_eq!(store.get_run("r1").await.unwrap().unwrap().status, RunStatus::Complete);
    }

    #[tokio::test]
    async fn test_failure_marks_dependents_upstream_failed() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let c = Arc::new(MockStage::new(json!(null)));
        let pipeline = Pipeline::new(
            abc(Arc::new(MockStage::new(json!(1))), Arc::new(FailingStage::new("boom")), c.clone()),
            store.clone(),
        );

        let outcome = pipeline.run("r1", BTreeMap::new()).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Partial);
        assert_eq!(outcome.stage_status("A"), Some(StageStatus::Success));
        assert_eq!(outcome.stage_status("B"), Some(StageStatus::Failed));
        assert_eq!(outcome.stage_status("C"), Some(StageStatus::Failed));
        assert_eq!(outcome.result("C").unwrap().error_kind(), Some(ErrorKind::UpstreamFailed));
        assert_eq!(c.call_count(), 0);
        assert_eq!(
            store.get("r1", "C").await.unwrap().unwrap().error_kind(),
            Some(ErrorKind::UpstreamFailed)
        );
    }

    #[tokio::test]
    async fn test_second_run_skips_checkpointed_stages() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let a = Arc::new(MockStage::new(json!(1)));
        let pipeline = Pipeline::new(
            abc(a.clone(), Arc::new(MockStage::new(json!(2))), Arc::new(MockStage::new(json!(3)))),
            store,
        );

        pipeline.run("r1", BTreeMap::new()).await.unwrap();
        let outcome = pipeline.run("r1", BTreeMap::new()).await.unwrap();

        assert_eq!(a.call_count(), 1);
        assert!(outcome.executed.is_empty());
        assert_eq!(outcome.skipped, vec!["A", "B", "C"]);
        assert_eq!(outcome.status, RunStatus::Complete);
    }

    #[tokio::test]
    async fn test_forced_rerun_cascades() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let a = Arc::new(MockStage::new(json!(1)));
        let b = Arc::new(MockStage::new(json!(2)));
        let c = Arc::new(MockStage::new(json!(3)));
        let pipeline = Pipeline::new(abc(a.clone(), b.clone(), c.clone()), store);

        pipeline.run("r1", BTreeMap::new()).await.unwrap();
        let outcome = pipeline
            .run_with(
                "r1",
                BTreeMap::new(),
                RunOptions::new().with_force(ForceRerun::stages(["A"])),
            )
            .await
            .unwrap();

        assert_eq!(outcome.skipped, vec!["B"]);
        assert_eq!((a.call_count(), b.call_count(), c.call_count()), (2, 1, 2));
        // C still sees B's checkpointed payload.
        assert_eq!(c.last_inputs().unwrap().upstream("B").unwrap(), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_cancellation_before_start_leaves_stages_pending() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let a = Arc::new(MockStage::new(json!(1)));
        let pipeline = Pipeline::new(
            abc(a.clone(), Arc::new(MockStage::new(json!(2))), Arc::new(MockStage::new(json!(3)))),
            store.clone(),
        );
        let token = Arc::new(CancellationToken::new());
        token.cancel("operator stop");

        let outcome = pipeline
            .run_with("r1", BTreeMap::new(), RunOptions::new().with_cancellation(token))
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.status, RunStatus::Pending);
        assert_eq!(a.call_count(), 0);
        let record = store.get_run("r1").await.unwrap().unwrap();
        assert_eq!(record.cancel_reason.as_deref(), Some("operator stop"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_pool_bounds_concurrency() {
        let gauge = Arc::new(Gauge::default());
        let mut builder = PipelineBuilder::new("fan-out");
        for i in 0..6 {
            builder = builder
                .stage(format!("s{i}"), Arc::new(GaugedStage(gauge.clone())), &[])
                .unwrap();
        }
        let pipeline = Pipeline::new(builder.build().unwrap(), Arc::new(InMemoryArtifactStore::new()))
            .with_worker_pool_size(2);

        let outcome = pipeline.run("r1", BTreeMap::new()).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Complete);
        assert_eq!(outcome.executed.len(), 6);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
        assert_eq!(gauge.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_worker_pool_of_one_serialises_roots() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let events = Arc::new(CollectingEventSink::new());
        let slow: Arc<dyn Stage> = Arc::new(SlowStage::new(Duration::from_millis(10)));
        let pipeline = Pipeline::new(abc(slow.clone(), slow.clone(), slow), store)
            .with_worker_pool_size(1)
            .with_event_sink(events.clone());

        let outcome = pipeline.run("r1", BTreeMap::new()).await.unwrap();

        assert_eq!(outcome.executed, vec!["A", "B", "C"]);
        let stage_events: Vec<String> = events
            .event_types()
            .into_iter()
            .filter(|t| t == "stage.started" || t == "stage.completed")
            .collect();
        assert_eq!(
            stage_events,
            vec![
                "stage.started",
                "stage.completed",
                "stage.started",
                "stage.completed",
                "stage.started",
                "stage.completed"
            ]
        );
    }

    #[tokio::test]
    async fn test_persistence_fault_stops_run() {
        let inner = Arc::new(InMemoryArtifactStore::new());
        let store = Arc::new(FailingArtifactStore::new(inner).failing_on("A"));
        let c = Arc::new(MockStage::new(json!(null)));
        let pipeline = Pipeline::new(
            abc(Arc::new(MockStage::new(json!(1))), Arc::new(MockStage::new(json!(2))), c.clone()),
            store,
        );

        let err = pipeline.run("r1", BTreeMap::new()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PersistenceError);
        let outcome = err.outcome().unwrap();
        assert_eq!(outcome.stage_status("A"), Some(StageStatus::Failed));
        assert_eq!(outcome.result("A").unwrap().error_kind(), Some(ErrorKind::PersistenceError));
        assert_eq!(c.call_count(), 0);
    }

    #[tokio::test]
    async fn test_resume_unknown_run() {
        let pipeline = Pipeline::new(
            abc(Arc::new(MockStage::new(json!(1))), Arc::new(MockStage::new(json!(2))), Arc::new(MockStage::new(json!(3)))),
            Arc::new(InMemoryArtifactStore::new()),
        );
        let err = pipeline.resume("ghost", RunOptions::new()).await.unwrap_err();
        assert!(matches!(err, CheckflowError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn test_start_generates_run_id_and_resume_reuses_inputs() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let a = Arc::new(MockStage::new(json!(1)));
        let pipeline = Pipeline::new(
            abc(a.clone(), Arc::new(FailingStage::new("down")), Arc::new(MockStage::new(json!(3)))),
            store,
        );
        let mut inputs = BTreeMap::new();
        inputs.insert("segment".to_string(), "fitness".to_string());

        let first = pipeline.start(inputs).await.unwrap();
        assert_eq!(first.status, RunStatus::Partial);

        let resumed = pipeline.resume(&first.run_id, RunOptions::new()).await.unwrap();
        assert_eq!(resumed.skipped, vec!["A"]);
        assert_eq!(a.call_count(), 1);
        assert_eq!(a.last_inputs().unwrap().param("segment"), Some("fitness"));
    }
}
