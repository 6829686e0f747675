//! Stage definitions.

use super::RetryPolicy;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::stages::Stage;
use crate::store::validate_key;
use std::sync::Arc;
use std::time::Duration;

/// Definition of a single stage in a pipeline.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    /// The unique name of the stage.
    pub name: String,
    /// The stage work.
    pub work: Arc<dyn Stage>,
    /// Names of stages this stage depends on, in declaration order.
    pub dependencies: Vec<String>,
    /// Whether the work may safely be executed more than once.
    pub idempotent: bool,
    /// Attempt budget and backoff, used only when `idempotent` is set.
    pub retry: RetryPolicy,
    /// Per-attempt timeout; falls back to the executor default when unset.
    pub timeout: Option<Duration>,
}

impl StageDefinition {
    /// Creates a new, non-idempotent stage definition.
    #[must_use]
    pub fn new(name: impl Into<String>, work: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            work,
            dependencies: Vec::new(),
            idempotent: false,
            retry: RetryPolicy::default(),
            timeout: None,
        }
    }

    /// Adds a dependency. Duplicates are ignored.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        let dep = dep.into();
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
        self
    }

    /// Adds several dependencies.
    #[must_use]
    pub fn with_dependencies(self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        deps.into_iter().fold(self, Self::with_dependency)
    }

    /// Marks the stage as idempotent so failed attempts may be retried.
    #[must_use]
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// Sets the maximum number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.retry = self.retry.with_max_attempts(attempts);
        self
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of attempts the executor may make.
    #[must_use]
    pub fn attempt_budget(&self) -> u32 {
        if self.idempotent {
            self.retry.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Validates the stage definition in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a usable key or the stage depends
    /// on itself.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if let Err(err) = validate_key(&self.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage name '{}' is invalid: {err}",
                self.name
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(
                ContractErrorInfo::new("CONTRACT-004-NAME", "Invalid stage name")
                    .with_fix_hint("Use only letters, digits, '.', '_' and '-'"),
            ));
        }

        if self.dependencies.contains(&self.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' cannot depend on itself",
                self.name
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(
                ContractErrorInfo::new("CONTRACT-004-SELF_DEP", "Self-dependency detected")
                    .with_fix_hint(format!("Remove '{}' from its own dependency list", self.name)),
            ));
        }
        Ok(())
    }
}
