//! Recovery planning: which stages a run invocation must execute.

use super::StageGraph;
use crate::errors::{CheckflowError, ContractErrorInfo, PipelineValidationError};
use crate::store::ArtifactStore;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Stages to rerun even though a successful checkpoint exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ForceRerun {
    /// Honour every successful checkpoint.
    #[default]
    None,
    /// Rerun every stage.
    All,
    /// Rerun the named stages and everything downstream of them.
    Stages(BTreeSet<String>),
}

impl ForceRerun {
    /// Forces the given stages.
    #[must_use]
    pub fn stages<I, S>(stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Stages(stages.into_iter().map(Into::into).collect())
    }
}

/// Decides which stages to skip, rerun, or force-rerun.
///
/// A stage is skipped iff its current result is `SUCCESS` and it is not
/// forced. `PARTIAL`, `FAILED` and never-run stages are always planned.
pub struct RecoveryPlanner {
    store: Arc<dyn ArtifactStore>,
}

impl std::fmt::Debug for RecoveryPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryPlanner").finish_non_exhaustive()
    }
}

impl RecoveryPlanner {
    /// Creates a planner reading checkpoints from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Returns the stages to execute, in a deterministic dependency order.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the graph is invalid or a forced
    /// stage is unknown, and a persistence error if the store cannot be read.
    pub async fn plan(
        &self,
        run_id: &str,
        graph: &StageGraph,
        force: &ForceRerun,
    ) -> Result<Vec<String>, CheckflowError> {
        graph.validate()?;

        if let ForceRerun::Stages(stages) = force {
            let unknown: Vec<String> = stages.iter().filter(|s| !graph.contains(s)).cloned().collect();
            if !unknown.is_empty() {
                return Err(PipelineValidationError::new(format!(
                    "Cannot force unknown stages: {}",
                    unknown.join(", ")
                ))
                .with_stages(unknown)
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-004-UNKNOWN_STAGE", "Forced stage not in pipeline")
                        .with_context_entry("pipeline", graph.name()),
                )
                .into());
            }
        }

        let completed = self.store.list_completed(run_id).await?;
        let forced: BTreeSet<String> = match force {
            ForceRerun::None => BTreeSet::new(),
            ForceRerun::All => graph.stage_names().iter().cloned().collect(),
            ForceRerun::Stages(stages) => graph.downstream_closure(stages.iter().map(String::as_str)),
        };

        let pending: HashSet<&str> = graph
            .stage_names()
            .iter()
            .map(String::as_str)
            .filter(|name| forced.contains(*name) || !completed.contains(*name))
            .collect();

        let order = graph.order_subset(&pending)?;
        debug!(
            run_id,
            pipeline = graph.name(),
            completed = completed.len(),
            planned = order.len(),
            "Recovery plan computed"
        );
        Ok(order)
    }
}
