//! Per-step wrapper: condition gate, retries, timeouts and status events.
//!
//! Every step the engine runs, top-level or nested inside `loop` and
//! `parallel`, goes through [`execute_step`]. One call:
//!
//! 1. Rejects immediately if the run is already cancelled.
//! 2. Evaluates the step's `condition`; false marks the step `skipped`.
//! 3. Makes up to `retry + 1` attempts. Each attempt runs under a child of
//!    the run's cancellation token, raced against `timeout_secs` when set.
//! 4. Emits `retrying` and sleeps `retry_delay_ms` between attempts.
//! 5. On success stores the size-capped output in the scope and emits
//!    `success`; on exhaustion emits `failed` and returns the last error.

use std::time::Duration;

use devflow_types::workflow::{StepDefinition, StepStatus};
use serde_json::Value;

use super::condition::evaluate_or_false;
use super::context::VariableScope;
use super::step_runner::{RunContext, StepError, StepRunner};

/// How a step finished when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The step ran; carries the output as stored in the scope.
    Completed(Value),
    /// The step's condition evaluated false.
    Skipped,
}

pub async fn execute_step(
    runner: &StepRunner,
    step: &StepDefinition,
    scope: &mut VariableScope,
    ctx: &RunContext,
) -> Result<StepOutcome, StepError> {
    if ctx.cancel.is_cancelled() {
        return Err(StepError::Cancelled);
    }

    if let Some(condition) = step.condition.as_deref() {
        if !evaluate_or_false(condition, scope) {
            tracing::debug!(run_id = %ctx.run_id, step = %step.id, condition, "condition false, skipping step");
            ctx.step_update(step, StepStatus::Skipped, None, None, None);
            return Ok(StepOutcome::Skipped);
        }
    }

    let max_attempts = step.retry.saturating_add(1);
    let delay = runner.retry_delay(step);
    let mut attempt = 1;

    loop {
        if ctx.cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }
        ctx.step_update(step, StepStatus::Running, Some(attempt), None, None);

        match run_attempt(runner, step, scope, ctx).await {
            Ok(output) => {
                let stored = scope.set_step_output(&step.id, output);
                ctx.step_update(step, StepStatus::Success, Some(attempt), Some(stored.clone()), None);
                return Ok(StepOutcome::Completed(stored));
            }
            Err(e) => {
                if ctx.cancel.is_cancelled() || e.is_cancelled() {
                    ctx.step_update(
                        step,
                        StepStatus::Failed,
                        Some(attempt),
                        None,
                        Some(StepError::Cancelled.to_string()),
                    );
                    return Err(StepError::Cancelled);
                }
                if attempt >= max_attempts {
                    tracing::warn!(
                        run_id = %ctx.run_id,
                        step = %step.id,
                        attempts = attempt,
                        error = %e,
                        "step failed"
                    );
                    ctx.step_update(step, StepStatus::Failed, Some(attempt), None, Some(e.to_string()));
                    return Err(e);
                }

                tracing::info!(
                    run_id = %ctx.run_id,
                    step = %step.id,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "step failed, retrying"
                );
                ctx.step_update(step, StepStatus::Retrying, Some(attempt), None, Some(e.to_string()));
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(StepError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

/// One attempt under its own child cancellation scope.
async fn run_attempt(
    runner: &StepRunner,
    step: &StepDefinition,
    scope: &VariableScope,
    ctx: &RunContext,
) -> Result<Value, StepError> {
    let attempt_ctx = ctx.child();
    let Some(secs) = step.timeout_secs else {
        return runner.run(step, scope, &attempt_ctx).await;
    };

    let limit = Duration::from_secs(secs);
    match tokio::time::timeout(limit, runner.run(step, scope, &attempt_ctx)).await {
        Ok(result) => result,
        Err(_) => {
            attempt_ctx.cancel.cancel();
            Err(StepError::Timeout(limit))
        }
    }
}
