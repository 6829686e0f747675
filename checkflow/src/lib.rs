//! # Checkflow
//!
//! Checkpointed, fault-isolated stage pipelines.
//!
//! A pipeline is a validated DAG of named stages. Every stage result is
//! persisted the moment it is produced, so a run interrupted at any point can
//! be resumed and only the stages without a successful checkpoint execute
//! again. A failing, panicking or hung stage is recorded as `FAILED` and only
//! affects the stages that depend on it.
//!
//! - **Checkpointing**: [`store::ArtifactStore`] with a durable filesystem
//!   backend and an in-memory backend
//! - **Isolation**: per-attempt timeouts, panic capture, retries for
//!   idempotent stages
//! - **Recovery**: [`pipeline::RecoveryPlanner`] skips stages whose current
//!   result is `SUCCESS` and reruns everything else
//! - **Observability**: injected [`events::EventSink`]s plus `tracing`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use checkflow::prelude::*;
//! use std::sync::Arc;
//!
//! let graph = PipelineBuilder::new("market-report")
//!     .stage("prices", Arc::new(PriceStage), &[])?
//!     .stage("news", Arc::new(NewsStage), &[])?
//!     .stage("summary", Arc::new(SummaryStage), &["prices", "news"])?
//!     .build()?;
//!
//! let pipeline = Pipeline::new(graph, Arc::new(FsArtifactStore::new("artifacts")));
//! let outcome = pipeline.start(inputs).await?;
//!
//! // Later, possibly in another process:
//! let outcome = pipeline.resume(&outcome.run_id, RunOptions::new()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod report;
pub mod stages;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{CheckflowConfig, LoggingConfig};
    pub use crate::context::StageInputs;
    pub use crate::core::{
        RunOutcome, RunRecord, RunStatus, StageError, StageOutput, StageResult, StageStatus,
    };
    pub use crate::errors::{
        CheckflowError, ContractErrorInfo, CycleDetectedError, ErrorKind, PersistenceError,
        PipelineValidationError, UndeclaredDependencyError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        ForceRerun, Pipeline, PipelineBuilder, RetryPolicy, RunOptions, StageDefinition,
        StageGraph,
    };
    pub use crate::report::RunReport;
    pub use crate::stages::{AsyncFnStage, FnStage, NoOpStage, Stage};
    pub use crate::store::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
}
