//! `agent` steps: drive one session on the injected [`AgentProvider`].
//!
//! Intermediate messages are forwarded to the event bus as they stream in.
//! Cancellation interrupts the agent before closing the session so the
//! provider can stop any tool calls in flight.
//!
//! [`AgentProvider`]: crate::workflow::providers::AgentProvider

use devflow_types::event::EngineEvent;
use devflow_types::workflow::{AgentStepConfig, StepDefinition};
use serde_json::{json, Map, Value};

use super::working_dir;
use crate::workflow::context::VariableScope;
use crate::workflow::providers::{AgentRequest, AgentStreamEvent};
use crate::workflow::step_runner::{RunContext, StepError, StepRunner};

pub(crate) async fn run(
    runner: &StepRunner,
    step: &StepDefinition,
    cfg: &AgentStepConfig,
    scope: &VariableScope,
    ctx: &RunContext,
) -> Result<Value, StepError> {
    let provider = runner.agent.as_ref().ok_or(StepError::MissingProvider("agent"))?;
    let step_id = ctx.qualified_id(&step.id);
    let request = AgentRequest {
        run_id: ctx.run_id,
        step_id: step_id.clone(),
        prompt: scope.resolve_str(&cfg.prompt),
        model: cfg.model.as_deref().map(|m| scope.resolve_str(m)),
        system_prompt: cfg.system_prompt.as_deref().map(|p| scope.resolve_str(p)),
        cwd: working_dir(cfg.cwd.as_deref(), scope, &ctx.project_dir),
        output_schema: cfg.output_schema.clone(),
    };

    let mut session = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(StepError::Cancelled),
        res = provider.start_session(request) => res.map_err(StepError::ExecutionFailed)?,
    };

    let outcome = loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => None,
            event = session.next_event() => Some(event),
        };
        let Some(next) = next else {
            tracing::info!(run_id = %ctx.run_id, step = %step_id, "interrupting agent session");
            session.interrupt().await;
            break Err(StepError::Cancelled);
        };
        match next {
            Some(AgentStreamEvent::Message(message)) => {
                ctx.events.publish(EngineEvent::AgentMessage {
                    run_id: ctx.run_id,
                    step_id: step_id.clone(),
                    message,
                });
            }
            Some(AgentStreamEvent::Result { text, structured }) => {
                break Ok(merge_output(text, structured));
            }
            Some(AgentStreamEvent::Error(e)) => break Err(StepError::ExecutionFailed(e)),
            None => {
                break Err(StepError::ExecutionFailed(
                    "agent session ended without a result".into(),
                ))
            }
        }
    };

    session.close().await;
    outcome
}

/// `{output: text}`, with the fields of an object-shaped structured result
/// merged in alongside.
fn merge_output(text: String, structured: Option<Value>) -> Value {
    let mut out = Map::new();
    match structured {
        Some(Value::Object(fields)) => out.extend(fields),
        Some(other) => {
            out.insert("structured".into(), other);
        }
        None => {}
    }
    out.insert("output".into(), Value::String(text));
    Value::Object(out)
}
