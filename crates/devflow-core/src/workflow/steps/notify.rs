//! `notify` steps: desktop notification event plus webhook fan-out.

use std::time::Duration;

use devflow_types::event::EngineEvent;
use devflow_types::workflow::NotifyStepConfig;
use serde_json::{json, Value};

use crate::workflow::context::VariableScope;
use crate::workflow::providers::HttpRequest;
use crate::workflow::step_runner::{RunContext, StepRunner};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Never fails. Webhook deliveries are spawned and their errors only logged.
pub(crate) fn run(
    runner: &StepRunner,
    cfg: &NotifyStepConfig,
    scope: &VariableScope,
    ctx: &RunContext,
) -> Value {
    let title = scope.resolve_str(&cfg.title);
    let message = scope.resolve_str(&cfg.message);

    if cfg.desktop {
        ctx.events.publish(EngineEvent::NotifyDesktop {
            title: title.clone(),
            message: message.clone(),
            level: cfg.level,
        });
    }

    let webhooks: Vec<String> = cfg.webhooks.iter().map(|w| scope.resolve_str(w)).collect();
    match runner.http.as_ref() {
        Some(client) => {
            let payload = json!({
                "title": title,
                "message": message,
                "level": cfg.level,
                "workflow_id": ctx.workflow_id,
                "run_id": ctx.run_id,
            });
            for url in &webhooks {
                let client = client.clone();
                let request = HttpRequest {
                    method: "POST".into(),
                    url: url.clone(),
                    headers: [("Content-Type".to_string(), "application/json".to_string())].into(),
                    body: Some(payload.clone()),
                    timeout: WEBHOOK_TIMEOUT,
                };
                tokio::spawn(async move {
                    let url = request.url.clone();
                    if let Err(e) = client.send(request).await {
                        tracing::warn!(url = %url, error = %e, "notification webhook failed");
                    }
                });
            }
        }
        None if !webhooks.is_empty() => {
            tracing::warn!(count = webhooks.len(), "no http client configured, skipping webhooks");
        }
        None => {}
    }

    json!({ "notified": cfg.desktop, "webhooks": webhooks.len() })
}
