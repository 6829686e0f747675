//! Core domain model types for checkflow.
//!
//! This module contains the fundamental types used throughout the framework:
//! - Stage and run status enums with run-level aggregation
//! - The output stage work returns and the result that gets persisted
//! - Run records and per-invocation outcomes

mod output;
mod result;
mod run;
mod status;

pub use output::StageOutput;
pub use result::{StageError, StageResult};
pub use run::{RunOutcome, RunRecord};
pub use status::{RunStatus, StageStatus};
