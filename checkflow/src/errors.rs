//! Error types for the checkflow framework.
//!
//! Two classes of failure exist. Stage-local failures (timeouts, errors or
//! panics raised by stage work) are recovered by the executor into `FAILED`
//! [`StageResult`](crate::core::StageResult)s and never appear here. Run-level
//! faults (a broken pipeline graph, a storage medium that refuses writes)
//! surface to the caller as [`CheckflowError`].

use crate::core::RunOutcome;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for checkflow operations.
#[derive(Debug, Error)]
pub enum CheckflowError {
    /// The pipeline definition is invalid (cycle, unknown dependency, ...).
    #[error("{0}")]
    Configuration(#[from] PipelineValidationError),

    /// A storage read or write failed outside of a stage attempt.
    #[error("{0}")]
    Persistence(#[from] PersistenceError),

    /// A stage result could not be persisted; the run was stopped.
    #[error("{0}")]
    PersistenceFault(Box<PersistenceFault>),

    /// No run record exists for the requested run id.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl CheckflowError {
    /// Returns the error kind used in the public taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::Config(_) | Self::RunNotFound(_) => {
                ErrorKind::ConfigurationError
            }
            Self::Persistence(_) | Self::PersistenceFault(_) => ErrorKind::PersistenceError,
        }
    }

    /// Returns the partial outcome carried by a persistence fault.
    #[must_use]
    pub fn outcome(&self) -> Option<&RunOutcome> {
        match self {
            Self::PersistenceFault(fault) => Some(&fault.outcome),
            _ => None,
        }
    }
}

/// Classification of a failure, recorded on stage results and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Cyclic or missing-dependency graph, rejected before execution.
    ConfigurationError,
    /// The stage exceeded its timeout.
    StageTimeout,
    /// The stage work returned an error or panicked.
    StageWorkError,
    /// The artifact store failed to read or write.
    PersistenceError,
    /// The stage was not executed because an upstream stage failed.
    UpstreamFailed,
    /// The stage produced usable but incomplete output.
    Incomplete,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::StageTimeout => "STAGE_TIMEOUT",
            Self::StageWorkError => "STAGE_WORK_ERROR",
            Self::PersistenceError => "PERSISTENCE_ERROR",
            Self::UpstreamFailed => "UPSTREAM_FAILED",
            Self::Incomplete => "INCOMPLETE",
        };
        f.write_str(s)
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in the pipeline graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "CONTRACT-004-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            stages: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

impl From<CycleDetectedError> for CheckflowError {
    fn from(err: CycleDetectedError) -> Self {
        Self::Configuration(err.into())
    }
}

/// Error raised when a stage reads an upstream output it did not declare.
#[derive(Debug, Clone, Error)]
#[error("Undeclared dependency: stage '{stage}' attempted to access '{key}' which was not declared as a dependency")]
pub struct UndeclaredDependencyError {
    /// The stage attempting access.
    pub stage: String,
    /// The undeclared key.
    pub key: String,
}

impl UndeclaredDependencyError {
    /// Creates a new undeclared dependency error.
    #[must_use]
    pub fn new(stage: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            key: key.into(),
        }
    }
}

/// Failures of the artifact store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// An I/O operation failed.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// What the store was doing.
        context: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded or decoded.
    #[error("Serialization error while {context}: {source}")]
    Serialization {
        /// What the store was doing.
        context: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A run id or stage name cannot be used as a storage key.
    #[error("Invalid storage key '{key}': {reason}")]
    InvalidKey {
        /// The offending key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A persisted record is unreadable.
    #[error("Corrupt record at {}: {message}", path.display())]
    Corrupt {
        /// Location of the record.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// A checkpoint the planner relied on has disappeared.
    #[error("Missing checkpoint for stage '{stage}' in run '{run_id}'")]
    MissingCheckpoint {
        /// The run id.
        run_id: String,
        /// The stage name.
        stage: String,
    },

    /// The backend refused the operation.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    /// Wraps an I/O error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wraps a serde error with context.
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }
}

/// A run stopped because a stage result could not be persisted.
#[derive(Debug, Error)]
#[error("Persistence fault in run '{run_id}' at stage '{stage}': {message}")]
pub struct PersistenceFault {
    /// The run id.
    pub run_id: String,
    /// The stage whose result could not be written.
    pub stage: String,
    /// The storage error message.
    pub message: String,
    /// What the run achieved before it was stopped.
    pub outcome: RunOutcome,
}

/// Errors raised while loading configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    InvalidValue {
        /// The variable name.
        var: String,
        /// The raw value.
        value: String,
        /// Why parsing failed.
        reason: String,
    },

    /// A field is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The logging subscriber could not be installed.
    #[error("Failed to initialise logging: {0}")]
    Logging(String),
}
