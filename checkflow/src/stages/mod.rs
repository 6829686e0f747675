//! Stage trait and implementations.
//!
//! A stage's work is an external collaborator: it receives the run inputs and
//! upstream payloads and returns a [`StageOutput`]. Returning an error or
//! panicking is allowed; the executor converts both into a failed result.

use crate::context::StageInputs;
use crate::core::StageOutput;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// Trait for pipeline stage work.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Executes the stage.
    ///
    /// # Errors
    ///
    /// Any error is recorded as a `STAGE_WORK_ERROR` failure for this stage.
    async fn execute(&self, inputs: &StageInputs) -> anyhow::Result<StageOutput>;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&StageInputs) -> anyhow::Result<StageOutput> + Send + Sync,
{
    label: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageInputs) -> anyhow::Result<StageOutput> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(label: impl Into<String>, func: F) -> Self {
        Self {
            label: label.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageInputs) -> anyhow::Result<StageOutput> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("label", &self.label).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageInputs) -> anyhow::Result<StageOutput> + Send + Sync,
{
    async fn execute(&self, inputs: &StageInputs) -> anyhow::Result<StageOutput> {
        (self.func)(inputs)
    }
}

/// An async function-based stage.
///
/// The closure receives an owned copy of the inputs so the returned future
/// can be `'static`.
pub struct AsyncFnStage<F, Fut>
where
    F: Fn(StageInputs) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<StageOutput>> + Send,
{
    label: String,
    func: F,
    _output: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnStage<F, Fut>
where
    F: Fn(StageInputs) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<StageOutput>> + Send,
{
    /// Creates a new async function-based stage.
    pub fn new(label: impl Into<String>, func: F) -> Self {
        Self {
            label: label.into(),
            func,
            _output: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnStage<F, Fut>
where
    F: Fn(StageInputs) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<StageOutput>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnStage").field("label", &self.label).finish()
    }
}

#[async_trait]
impl<F, Fut> Stage for AsyncFnStage<F, Fut>
where
    F: Fn(StageInputs) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<StageOutput>> + Send,
{
    async fn execute(&self, inputs: &StageInputs) -> anyhow::Result<StageOutput> {
        (self.func)(inputs.clone()).await
    }
}

/// A stage that succeeds with a null payload.
#[derive(Debug, Clone, Default)]
pub struct NoOpStage;

#[async_trait]
impl Stage for NoOpStage {
    async fn execute(&self, _inputs: &StageInputs) -> anyhow::Result<StageOutput> {
        Ok(StageOutput::success_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn inputs() -> StageInputs {
        let mut params = BTreeMap::new();
        params.insert("segment".to_string(), "saas".to_string());
        StageInputs::root("r1", "test", params)
    }

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("echo", |inputs: &StageInputs| -> anyhow::Result<StageOutput> {
            Ok(StageOutput::success(serde_json::json!(inputs.param("segment"))))
        });

        let output = stage.execute(&inputs()).await.unwrap();
        assert_eq!(output.payload, serde_json::json!("saas"));
    }

    #[tokio::test]
    async fn test_fn_stage_error() {
        let stage = FnStage::new("broken", |_: &StageInputs| -> anyhow::Result<StageOutput> {
            anyhow::bail!("provider down")
        });
        let err = stage.execute(&inputs()).await.unwrap_err();
        assert_eq!(err.to_string(), "provider down");
    }

    #[tokio::test]
    async fn test_async_fn_stage() {
        let stage = AsyncFnStage::new("async", |inputs: StageInputs| async move {
            tokio::task::yield_now().await;
            Ok::<_, anyhow::Error>(StageOutput::success(serde_json::json!(inputs.run_id())))
        });

        let output = stage.execute(&inputs()).await.unwrap();
        assert_eq!(output.payload, serde_json::json!("r1"));
    }

    #[tokio::test]
    async fn test_noop_stage() {
        let output = NoOpStage.execute(&inputs()).await.unwrap();
        assert!(output.is_usable());
    }
}
