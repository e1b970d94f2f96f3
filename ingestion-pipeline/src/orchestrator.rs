//! Sequences handlers, retries transient failures, logs, publishes document id (§4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::error::AppError;
use common::pipeline_state::PipelineState;
use common::utils::config::OrchestratorConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::handler::{Outcome, StepHandler};

pub struct Orchestrator {
    handlers: HashMap<&'static str, Arc<dyn StepHandler>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            handlers: HashMap::new(),
            config,
        }
    }

    pub fn register(&mut self, handler: Arc<dyn StepHandler>) -> &mut Self {
        self.handlers.insert(handler.step_name(), handler);
        self
    }

    /// Drives `state` through its `remaining_steps`, honouring cancellation and
    /// retrying transient failures up to `config.max_retries` times per step.
    #[tracing::instrument(skip_all, fields(document_id = %state.document_id, execution_id = %state.execution_id))]
    pub async fn run(
        &self,
        mut state: PipelineState,
        cancel: &CancellationToken,
    ) -> Result<PipelineState, AppError> {
        let pipeline_started = Instant::now();

        while let Some(step_name) = state.remaining_steps.first().cloned() {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let handler = self
                .handlers
                .get(step_name.as_str())
                .cloned()
                .ok_or_else(|| AppError::PipelineStepFailed {
                    step: step_name.clone(),
                    outcome: "no handler registered".to_string(),
                })?;

            state = self.run_step(&step_name, handler, state, cancel).await?;
        }

        state.complete = true;
        state.upload_complete = true;
        state.touch();
        info!(
            total_ms = pipeline_started.elapsed().as_millis() as u64,
            "ingestion pipeline finished"
        );

        Ok(state)
    }

    async fn run_step(
        &self,
        step_name: &str,
        handler: Arc<dyn StepHandler>,
        mut state: PipelineState,
        cancel: &CancellationToken,
    ) -> Result<PipelineState, AppError> {
        let step_started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            state.log(step_name, format!("starting attempt {attempt}"));

            let result = handler.invoke(state.clone(), cancel).await;

            match result {
                Ok((Outcome::Success, mut next_state)) => {
                    next_state.completed_steps.push(step_name.to_string());
                    next_state.remaining_steps.retain(|s| s != step_name);
                    next_state.log(
                        step_name,
                        format!(
                            "succeeded after {attempt} attempt(s) in {}ms",
                            step_started.elapsed().as_millis()
                        ),
                    );
                    return Ok(next_state);
                }
                Ok((Outcome::TransientError, mut next_state)) => {
                    if attempt > self.config.max_retries {
                        next_state.log(step_name, "transient failure; retries exhausted");
                        return Err(AppError::PipelineStepFailed {
                            step: step_name.to_string(),
                            outcome: "transient failure; retries exhausted".to_string(),
                        });
                    }
                    next_state.log(step_name, format!("transient failure on attempt {attempt}; retrying"));
                    self.backoff(attempt, cancel).await?;
                    state = next_state;
                }
                Ok((Outcome::FatalError, mut next_state)) => {
                    next_state.log(step_name, "fatal failure");
                    return Err(AppError::PipelineStepFailed {
                        step: step_name.to_string(),
                        outcome: "fatal failure".to_string(),
                    });
                }
                Err(err) if matches!(err, AppError::Cancelled) => {
                    return Err(err);
                }
                Err(err) if err.is_retryable() && attempt <= self.config.max_retries => {
                    warn!(step = step_name, attempt, error = %err, "retrying after raised error");
                    self.backoff(attempt, cancel).await?;
                }
                Err(err) => {
                    return Err(AppError::PipelineStepFailed {
                        step: step_name.to_string(),
                        outcome: err.to_string(),
                    });
                }
            }
        }
    }

    async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> Result<(), AppError> {
        let delay = Duration::from_millis(self.config.backoff_base_millis * u64::from(attempt));
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = cancel.cancelled() => Err(AppError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::pipeline_state::UploadedFile;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysSucceeds;

    #[async_trait]
    impl StepHandler for AlwaysSucceeds {
        fn step_name(&self) -> &'static str {
            "always-succeeds"
        }

        async fn invoke(
            &self,
            state: PipelineState,
            _cancel: &CancellationToken,
        ) -> Result<(Outcome, PipelineState), AppError> {
            Ok((Outcome::Success, state))
        }
    }

    struct FailsThenSucceeds {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl StepHandler for FailsThenSucceeds {
        fn step_name(&self) -> &'static str {
            "flaky"
        }

        async fn invoke(
            &self,
            state: PipelineState,
            _cancel: &CancellationToken,
        ) -> Result<(Outcome, PipelineState), AppError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < 2 {
                Ok((Outcome::TransientError, state))
            } else {
                Ok((Outcome::Success, state))
            }
        }
    }

    struct AlwaysFatal;

    #[async_trait]
    impl StepHandler for AlwaysFatal {
        fn step_name(&self) -> &'static str {
            "always-fatal"
        }

        async fn invoke(
            &self,
            state: PipelineState,
            _cancel: &CancellationToken,
        ) -> Result<(Outcome, PipelineState), AppError> {
            Ok((Outcome::FatalError, state))
        }
    }

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            max_retries: 2,
            backoff_base_millis: 1,
        }
    }

    #[tokio::test]
    async fn completed_steps_equals_initial_steps_in_order() {
        let mut orchestrator = Orchestrator::new(test_config());
        orchestrator.register(Arc::new(AlwaysSucceeds));

        let mut state = PipelineState::new("default", Vec::<UploadedFile>::new());
        state.then("always-succeeds");

        let result = orchestrator
            .run(state.clone(), &CancellationToken::new())
            .await
            .expect("pipeline should succeed");

        assert_eq!(result.completed_steps, state.steps);
        assert!(result.remaining_steps.is_empty());
        assert!(result.complete);
        assert!(result.upload_complete);
    }

    #[tokio::test]
    async fn retries_transient_failure_then_succeeds() {
        let mut orchestrator = Orchestrator::new(test_config());
        orchestrator.register(Arc::new(FailsThenSucceeds {
            attempts: AtomicU32::new(0),
        }));

        let mut state = PipelineState::new("default", Vec::<UploadedFile>::new());
        state.then("flaky");

        let result = orchestrator
            .run(state, &CancellationToken::new())
            .await
            .expect("should succeed after one retry");

        assert_eq!(result.completed_steps, vec!["flaky"]);
        let retry_logs = result
            .logs
            .iter()
            .filter(|entry| entry.text.contains("retrying"))
            .count();
        assert_eq!(retry_logs, 1);
    }

    #[tokio::test]
    async fn fatal_error_stops_the_pipeline() {
        let mut orchestrator = Orchestrator::new(test_config());
        orchestrator.register(Arc::new(AlwaysFatal));

        let mut state = PipelineState::new("default", Vec::<UploadedFile>::new());
        state.then("always-fatal");

        let err = orchestrator
            .run(state, &CancellationToken::new())
            .await
            .expect_err("should fail");

        assert!(matches!(err, AppError::PipelineStepFailed { .. }));
    }

    #[tokio::test]
    async fn unregistered_step_is_a_fatal_error() {
        let orchestrator = Orchestrator::new(test_config());

        let mut state = PipelineState::new("default", Vec::<UploadedFile>::new());
        state.then("missing-step");

        let err = orchestrator
            .run(state, &CancellationToken::new())
            .await
            .expect_err("should fail");

        assert!(matches!(err, AppError::PipelineStepFailed { .. }));
    }

    #[tokio::test]
    async fn cancellation_before_a_step_is_not_retried() {
        let mut orchestrator = Orchestrator::new(test_config());
        orchestrator.register(Arc::new(AlwaysSucceeds));

        let mut state = PipelineState::new("default", Vec::<UploadedFile>::new());
        state.then("always-succeeds");

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .run(state, &cancel)
            .await
            .expect_err("should be cancelled");

        assert!(matches!(err, AppError::Cancelled));
    }
}
