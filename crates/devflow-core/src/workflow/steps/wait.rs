//! `wait` steps: block until approved, timed out or cancelled.

use std::time::Duration;

use devflow_types::workflow::{StepDefinition, WaitStepConfig};
use serde_json::{json, Value};

use crate::workflow::context::VariableScope;
use crate::workflow::step_runner::{RunContext, StepError, StepRunner};

pub(crate) async fn run(
    runner: &StepRunner,
    step: &StepDefinition,
    cfg: &WaitStepConfig,
    scope: &VariableScope,
    ctx: &RunContext,
) -> Result<Value, StepError> {
    let step_id = ctx.qualified_id(&step.id);
    let (rx, _guard) = runner.waits.register(ctx.run_id, &step_id);
    let prompt = cfg.message.as_deref().map(|m| scope.resolve_str(m)).unwrap_or_default();
    tracing::info!(run_id = %ctx.run_id, step = %step_id, prompt = %prompt, "waiting for approval");

    let timer = async {
        match cfg.timeout_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(StepError::Cancelled),
        approval = rx => match approval {
            Ok(data) => Ok(json!({ "approved": true, "data": data })),
            Err(_) => Err(StepError::ExecutionFailed("approval channel closed".into())),
        },
        _ = timer => {
            tracing::info!(run_id = %ctx.run_id, step = %step_id, "wait timed out");
            Ok(json!({ "timed_out": true }))
        }
    }
}
