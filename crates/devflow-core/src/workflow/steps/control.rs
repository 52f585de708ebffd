//! `loop` and `parallel` steps: nested execution through the retry wrapper.
//!
//! Nested steps run against a clone of the enclosing scope, so their outputs
//! never leak back out except through the container step's own output.
//! Their events carry qualified ids (`each[2].build`, `fan.lint`).

use devflow_types::workflow::{LoopMode, LoopStepConfig, ParallelStepConfig, StepDefinition};
use futures_util::future::{join_all, try_join_all};
use serde_json::{json, Map, Value};

use crate::workflow::context::VariableScope;
use crate::workflow::retry::{execute_step, StepOutcome};
use crate::workflow::step_runner::{RunContext, StepError, StepRunner};

pub(crate) async fn run_loop(
    runner: &StepRunner,
    step: &StepDefinition,
    cfg: &LoopStepConfig,
    scope: &VariableScope,
    ctx: &RunContext,
) -> Result<Value, StepError> {
    let items = match scope.lookup_path(&cfg.items) {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => {
            return Err(StepError::ExecutionFailed(format!(
                "loop source '{}' is not an array (got {})",
                cfg.items,
                type_name(other)
            )))
        }
        None => {
            return Err(StepError::ExecutionFailed(format!(
                "loop source '{}' did not resolve",
                cfg.items
            )))
        }
    };

    let iterations: Vec<Map<String, Value>> = match cfg.mode {
        LoopMode::Sequential => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                out.push(run_iteration(runner, step, cfg, scope, ctx, index, item).await?);
            }
            out
        }
        LoopMode::Parallel => {
            try_join_all(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| run_iteration(runner, step, cfg, scope, ctx, index, item)),
            )
            .await?
        }
    };

    let count = iterations.len();
    Ok(json!({ "iterations": iterations, "count": count }))
}

async fn run_iteration(
    runner: &StepRunner,
    step: &StepDefinition,
    cfg: &LoopStepConfig,
    scope: &VariableScope,
    ctx: &RunContext,
    index: usize,
    item: Value,
) -> Result<Map<String, Value>, StepError> {
    let mut local = scope.clone();
    local.set_variable("item", item);
    local.set_variable("index", json!(index));
    let nested = ctx.nested(&format!("{}[{index}].", step.id));

    let mut outputs = Map::new();
    for inner in &cfg.steps {
        if let StepOutcome::Completed(output) = execute_step(runner, inner, &mut local, &nested).await? {
            outputs.insert(inner.id.clone(), output);
        }
    }
    Ok(outputs)
}

pub(crate) async fn run_parallel(
    runner: &StepRunner,
    step: &StepDefinition,
    cfg: &ParallelStepConfig,
    scope: &VariableScope,
    ctx: &RunContext,
) -> Result<Value, StepError> {
    let nested = ctx.nested(&format!("{}.", step.id));
    let outcomes = join_all(cfg.steps.iter().map(|inner| {
        let mut local = scope.clone();
        let nested = &nested;
        async move { execute_step(runner, inner, &mut local, nested).await }
    }))
    .await;

    let mut results = Map::new();
    let mut failed = Vec::new();
    for (inner, outcome) in cfg.steps.iter().zip(outcomes) {
        let entry = match outcome {
            Ok(StepOutcome::Completed(output)) => json!({ "success": true, "output": output }),
            Ok(StepOutcome::Skipped) => json!({ "success": true, "skipped": true }),
            Err(StepError::Cancelled) => return Err(StepError::Cancelled),
            Err(e) => {
                failed.push(inner.id.clone());
                json!({ "success": false, "error": e.to_string() })
            }
        };
        results.insert(inner.id.clone(), entry);
    }

    if cfg.fail_fast && !failed.is_empty() {
        return Err(StepError::ExecutionFailed(format!(
            "{} of {} parallel steps failed: {}",
            failed.len(),
            cfg.steps.len(),
            failed.join(", ")
        )));
    }
    Ok(json!({ "results": results, "failed": failed.len() }))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
