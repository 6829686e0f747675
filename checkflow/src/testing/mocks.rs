//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::StageInputs;
use crate::core::StageOutput;
use crate::stages::Stage;

/// A stage that records its calls and returns a configurable output.
#[derive(Debug)]
pub struct MockStage {
    output: Mutex<StageOutput>,
    calls: Mutex<Vec<StageInputs>>,
}

impl MockStage {
    /// Creates a mock stage that succeeds with `payload`.
    #[must_use]
    pub fn new(payload: Value) -> Self {
        Self::with_output(StageOutput::success(payload))
    }

    /// Creates a mock stage returning a fixed output.
    #[must_use]
    pub fn with_output(output: StageOutput) -> Self {
        Self {
            output: Mutex::new(output),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sets the output to return from now on.
    pub fn set_output(&self, output: StageOutput) {
        *self.output.lock() = output;
    }

    /// Returns the number of times the stage ran.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the inputs of the most recent call.
    #[must_use]
    pub fn last_inputs(&self) -> Option<StageInputs> {
        self.calls.lock().last().cloned()
    }
}

#[async_trait]
impl Stage for MockStage {
    async fn execute(&self, inputs: &StageInputs) -> anyhow::Result<StageOutput> {
        self.calls.lock().push(inputs.clone());
        Ok(self.output.lock().clone())
    }
}

/// A stage whose work always returns an error.
#[derive(Debug)]
pub struct FailingStage {
    error: String,
    calls: AtomicUsize,
}

impl FailingStage {
    /// Creates a failing stage.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of times the stage ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for FailingStage {
    async fn execute(&self, _inputs: &StageInputs) -> anyhow::Result<StageOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("{}", self.error)
    }
}

/// A stage that fails its first `failures` calls, then succeeds.
#[derive(Debug)]
pub struct FlakyStage {
    failures: usize,
    payload: Value,
    calls: AtomicUsize,
}

impl FlakyStage {
    /// Creates a flaky stage.
    #[must_use]
    pub fn new(failures: usize, payload: Value) -> Self {
        Self {
            failures,
            payload,
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of times the stage ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for FlakyStage {
    async fn execute(&self, _inputs: &StageInputs) -> anyhow::Result<StageOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            anyhow::bail!("transient failure {} of {}", call + 1, self.failures);
        }
        Ok(StageOutput::success(self.payload.clone()))
    }
}

/// A stage that sleeps before succeeding.
#[derive(Debug)]
pub struct SlowStage {
    delay: Duration,
}

impl SlowStage {
    /// Creates a slow stage.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Stage for SlowStage {
    async fn execute(&self, _inputs: &StageInputs) -> anyhow::Result<StageOutput> {
        tokio::time::sleep(self.delay).await;
        Ok(StageOutput::success_empty())
    }
}

/// A stage that panics.
#[derive(Debug)]
pub struct PanickingStage {
    message: String,
}

impl PanickingStage {
    /// Creates a panicking stage.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Stage for PanickingStage {
    #[allow(clippy::panic)]
    async fn execute(&self, _inputs: &StageInputs) -> anyhow::Result<StageOutput> {
        panic!("{}", self.message)
    }
}
