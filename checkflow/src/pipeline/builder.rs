//! Pipeline builder with validation.

use super::{RetryPolicy, StageDefinition, StageGraph};
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::stages::Stage;
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for creating validated stage graphs.
///
/// Stages may reference dependencies declared later; unknown dependencies
/// and cycles are reported by [`PipelineBuilder::build`].
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// The stage definitions.
    stages: HashMap<String, StageDefinition>,
    /// Insertion order for stages.
    stage_order: Vec<String>,
    /// Retry policy given to stages added through [`PipelineBuilder::stage`].
    default_retry: RetryPolicy,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: HashMap::new(),
            stage_order: Vec::new(),
            default_retry: RetryPolicy::default(),
        }
    }

    /// Sets the retry policy for stages added with [`PipelineBuilder::stage`]
    /// and [`PipelineBuilder::idempotent_stage`].
    #[must_use]
    pub fn with_default_retry(mut self, retry: RetryPolicy) -> Self {
        self.default_retry = retry;
        self
    }

    /// Adds a stage with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, taken, or self-referencing.
    pub fn stage(
        self,
        name: impl Into<String>,
        work: Arc<dyn Stage>,
        dependencies: &[&str],
    ) -> Result<Self, PipelineValidationError> {
        let def = StageDefinition::new(name, work)
            .with_dependencies(dependencies.iter().copied())
            .with_retry(self.default_retry.clone());
        self.with_stage(def)
    }

    /// Adds an idempotent stage, retried under the builder's default policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, taken, or self-referencing.
    pub fn idempotent_stage(
        self,
        name: impl Into<String>,
        work: Arc<dyn Stage>,
        dependencies: &[&str],
    ) -> Result<Self, PipelineValidationError> {
        let def = StageDefinition::new(name, work)
            .with_dependencies(dependencies.iter().copied())
            .with_retry(self.default_retry.clone())
            .idempotent();
        self.with_stage(def)
    }

    /// Adds a fully configured stage definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, taken, or self-referencing.
    pub fn with_stage(mut self, def: StageDefinition) -> Result<Self, PipelineValidationError> {
        self.add_stage(def)?;
        Ok(self)
    }

    /// Adds a stage definition in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, taken, or self-referencing.
    pub fn add_stage(&mut self, def: StageDefinition) -> Result<(), PipelineValidationError> {
        def.validate()?;

        if self.stages.contains_key(&def.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' is defined more than once",
                def.name
            ))
            .with_stages(vec![def.name.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "CONTRACT-004-DUPLICATE",
                    format!("Duplicate stage name '{}'", def.name),
                )
                .with_fix_hint("Give every stage a unique name."),
            ));
        }

        self.stage_order.push(def.name.clone());
        self.stages.insert(def.name.clone(), def);
        Ok(())
    }

    /// Validates the whole graph and builds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, there are no stages, a
    /// dependency is unknown, or the dependencies form a cycle.
    pub fn build(self) -> Result<StageGraph, PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new(
                "Pipeline name cannot be empty or whitespace-only",
            )
            .with_error_info(ContractErrorInfo::new(
                "CONTRACT-004-NAME",
                "Pipeline name is empty",
            )));
        }

        let graph = StageGraph::new(self.name, self.stages, self.stage_order);
        graph.validate()?;
        Ok(graph)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}
