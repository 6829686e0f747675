//! Pipeline definition, planning and execution.
//!
//! This module provides:
//! - Stage definitions and the validated stage graph
//! - A builder that reports configuration errors before anything runs
//! - The single-stage executor (timeouts, retries, failure capture)
//! - The recovery planner deciding which stages to (re)run
//! - The pipeline driver with checkpoint resumption

mod builder;
mod executor;
mod graph;
mod planner;
mod retry;
mod runner;
mod spec;

pub use builder::PipelineBuilder;
pub use executor::{StageExecutor, DEFAULT_STAGE_TIMEOUT};
pub use graph::StageGraph;
pub use planner::{ForceRerun, RecoveryPlanner};
pub use retry::{BackoffStrategy, JitterStrategy, RetryDecision, RetryPolicy};
pub use runner::{Pipeline, RunOptions, DEFAULT_WORKER_POOL_SIZE};
pub use spec::StageDefinition;
