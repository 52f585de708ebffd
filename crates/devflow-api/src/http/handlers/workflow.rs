//! Workflow handlers: listing, manual triggers and trigger reload.

use std::path::PathBuf;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use devflow_core::repository::workflow::WorkflowRepository;
use devflow_core::workflow::orchestrator::TriggerOutcome;
use devflow_types::workflow::{
    ConcurrencyPolicy, TriggerKind, TriggerOptions, TriggerSource, WorkflowDefinition,
};

use crate::http::error::AppError;
use crate::http::response::RequestTimer;
use crate::state::AppState;

/// Row of `GET /workflows`.
#[derive(Debug, Serialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
    pub trigger: TriggerKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_value: Option<String>,
    pub concurrency: ConcurrencyPolicy,
    pub steps: usize,
    pub depends_on: Vec<String>,
    pub active_runs: usize,
    pub queue_length: usize,
}

impl WorkflowSummary {
    fn new(def: &WorkflowDefinition, state: &AppState) -> Self {
        let steps = match &def.graph {
            Some(graph) => graph.nodes.len(),
            None => def.steps.len(),
        };
        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            description: def.description.clone(),
            enabled: def.enabled,
            trigger: def.trigger.kind,
            trigger_value: def.trigger.value.clone(),
            concurrency: def.concurrency,
            steps,
            depends_on: def.dependency_ids(),
            active_runs: state.orchestrator.active_count(&def.id),
            queue_length: state.orchestrator.queue_length(&def.id),
        }
    }
}

/// Optional body of `POST /workflows/{id}/trigger`.
#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub project_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub workflow_id: String,
    /// `started` or `skipped`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Parse an optional JSON body; an empty body yields the default.
pub(crate) fn parse_optional_body<T: Default + for<'de> Deserialize<'de>>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::Validation(format!("invalid JSON body: {e}")))
}

/// Project directories must exist; file steps are confined to the resolved path.
async fn canonical_project_dir(dir: &std::path::Path) -> Result<PathBuf, AppError> {
    let path = tokio::fs::canonicalize(dir)
        .await
        .map_err(|e| AppError::Validation(format!("project_path {}: {e}", dir.display())))?;
    let is_dir = tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir());
    if !is_dir {
        return Err(AppError::Validation(format!(
            "project_path {} is not a directory",
            path.display()
        )));
    }
    Ok(path)
}

/// GET /api/v1/workflows
pub async fn list_workflows(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let timer = RequestTimer::start();
    let defs = state.store().load_workflows().await?;
    let summaries: Vec<WorkflowSummary> = defs.iter().map(|d| WorkflowSummary::new(d, &state)).collect();

    Ok(timer.success(summaries).with_link("self", "/api/v1/workflows"))
}

/// POST /api/v1/workflows/{id}/trigger
///
/// With `concurrency: queue` this returns once the queued run has started.
pub async fn trigger_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let timer = RequestTimer::start();
    let request: TriggerRequest = parse_optional_body(&body)?;
    let project_path = match request.project_path {
        Some(dir) => Some(canonical_project_dir(&dir).await?),
        None => None,
    };

    let options = TriggerOptions {
        source: TriggerSource::Manual,
        trigger_data: request.payload,
        project_path,
    };
    let outcome = state.orchestrator.trigger(&id, options).await?;

    let (status, response) = match outcome {
        TriggerOutcome::Started(handle) => {
            tracing::info!(workflow_id = %id, run_id = %handle.run_id, "workflow triggered via API");
            (
                StatusCode::ACCEPTED,
                TriggerResponse {
                    workflow_id: id.clone(),
                    status: "started",
                    run_id: Some(handle.run_id.to_string()),
                },
            )
        }
        TriggerOutcome::Skipped => (
            StatusCode::OK,
            TriggerResponse {
                workflow_id: id.clone(),
                status: "skipped",
                run_id: None,
            },
        ),
    };

    let mut envelope = timer
        .success(response)
        .with_status(status)
        .with_link("workflow", &format!("/api/v1/workflows/{id}"));
    if let Some(run_id) = envelope.data.as_ref().and_then(|r| r.run_id.clone()) {
        envelope = envelope.with_link("run", &format!("/api/v1/runs/{run_id}"));
    }
    Ok(envelope)
}

/// POST /api/v1/workflows/reload
///
/// Re-reads the workflow directory and rebuilds cron, hook and chain matchers.
pub async fn reload_workflows(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let timer = RequestTimer::start();
    let loaded = state
        .reload_triggers()
        .await
        .map_err(|e| AppError::Internal(format!("{e:#}")))?;
    let schedules: Vec<Value> = state
        .scheduler
        .cron_schedules()
        .into_iter()
        .map(|(workflow_id, expression)| serde_json::json!({ "workflow_id": workflow_id, "cron": expression }))
        .collect();

    Ok(timer.success(serde_json::json!({
        "workflows": loaded,
        "cron": schedules,
    })))
}
