//! `http` steps through the injected [`HttpClient`](crate::workflow::providers::HttpClient).

use std::time::Duration;

use devflow_types::workflow::HttpStepConfig;
use serde_json::{json, Value};

use crate::workflow::context::VariableScope;
use crate::workflow::providers::HttpRequest;
use crate::workflow::step_runner::{RunContext, StepError, StepRunner};

pub(crate) async fn run(
    runner: &StepRunner,
    cfg: &HttpStepConfig,
    scope: &VariableScope,
    ctx: &RunContext,
) -> Result<Value, StepError> {
    let client = runner.http.as_ref().ok_or(StepError::MissingProvider("http"))?;
    let timeout = cfg
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(runner.http_timeout);
    let request = HttpRequest {
        method: scope.resolve_str(&cfg.method).to_uppercase(),
        url: scope.resolve_str(&cfg.url),
        headers: cfg
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), scope.resolve_str(v)))
            .collect(),
        body: cfg.body.as_ref().map(|b| scope.resolve_deep(b)),
        timeout,
    };
    tracing::debug!(run_id = %ctx.run_id, method = %request.method, url = %request.url, "http step");

    let response = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(StepError::Cancelled),
        res = tokio::time::timeout(timeout, client.send(request)) => match res {
            Ok(res) => res.map_err(StepError::ExecutionFailed)?,
            Err(_) => return Err(StepError::Timeout(timeout)),
        },
    };

    Ok(json!({
        "status": response.status,
        "headers": response.headers,
        "body": response.body,
    }))
}
