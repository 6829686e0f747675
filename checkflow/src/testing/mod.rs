//! Testing utilities for checkflow pipelines.
//!
//! Mock stages covering each failure mode the executor isolates, and a store
//! wrapper that injects write failures.

mod mocks;
mod store;

pub use mocks::{FailingStage, FlakyStage, MockStage, PanickingStage, SlowStage};
pub use store::FailingArtifactStore;
