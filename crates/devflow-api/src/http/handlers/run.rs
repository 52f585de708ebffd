//! Run handlers: active runs, run history, cancellation and wait approval.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use devflow_core::repository::workflow::WorkflowRepository;
use devflow_core::workflow::orchestrator::OrchestratorError;

use crate::http::error::AppError;
use crate::http::handlers::workflow::parse_optional_body;
use crate::http::response::RequestTimer;
use crate::state::AppState;

/// Optional body of the approve endpoint. The `data` value is handed to the
/// waiting step as its output.
#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub data: Value,
}

fn parse_run_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::Validation(format!("invalid run id: {raw}")))
}

/// GET /api/v1/runs
pub async fn list_active_runs(State(state): State<AppState>) -> impl IntoResponse {
    let timer = RequestTimer::start();
    timer
        .success(state.orchestrator.active_runs())
        .with_link("self", "/api/v1/runs")
}

/// GET /api/v1/runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let timer = RequestTimer::start();
    let run_id = parse_run_id(&id)?;

    let run = state
        .store()
        .get_run(&run_id)
        .await?
        .ok_or(OrchestratorError::RunNotFound(run_id))?;
    let result = state.store().get_result_payload(&run_id).await?;
    let active = state.orchestrator.run_handle(run_id).is_some();

    Ok(timer
        .success(json!({
            "run": run,
            "active": active,
            "result": result,
        }))
        .with_link("self", &format!("/api/v1/runs/{run_id}"))
        .with_link("cancel", &format!("/api/v1/runs/{run_id}/cancel")))
}

/// POST /api/v1/runs/{id}/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let timer = RequestTimer::start();
    let run_id = parse_run_id(&id)?;
    state.orchestrator.cancel(run_id)?;

    Ok(timer.success(json!({ "run_id": run_id, "cancelled": true })))
}

/// POST /api/v1/runs/{id}/steps/{step_id}/approve
pub async fn approve_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let timer = RequestTimer::start();
    let run_id = parse_run_id(&id)?;
    let request: ApproveRequest = parse_optional_body(&body)?;
    state.orchestrator.approve_wait(run_id, &step_id, request.data)?;

    Ok(timer.success(json!({ "run_id": run_id, "step_id": step_id, "approved": true })))
}
