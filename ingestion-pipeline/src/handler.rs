//! Step handler contract (§4.2).

use async_trait::async_trait;
use common::error::AppError;
use common::pipeline_state::PipelineState;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    TransientError,
    FatalError,
}

/// One unit of pipeline work, registered under a stable `step_name`.
///
/// Implementations must be retry-safe: invoking a handler twice on the same
/// input state produces an equivalent output state. Handlers append artifacts
/// and context entries; they never remove them.
///
/// A handler signals retriable trouble either by returning `Ok((Outcome::TransientError, state))`
/// or by returning an `Err` whose `AppError::is_retryable()` is true — both are treated
/// identically by the orchestrator. Any other `Err` is fatal immediately.
#[async_trait]
pub trait StepHandler: Send + Sync {
    fn step_name(&self) -> &'static str;

    async fn invoke(
        &self,
        state: PipelineState,
        cancel: &CancellationToken,
    ) -> Result<(Outcome, PipelineState), AppError>;
}
