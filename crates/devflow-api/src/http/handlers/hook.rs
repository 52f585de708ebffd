//! Lifecycle hook intake.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use devflow_types::workflow::HookEvent;

use crate::http::response::RequestTimer;
use crate::state::AppState;

/// POST /api/v1/hooks
///
/// Body is a hook event (`{"type": "...", ...payload}`). Returns the ids of
/// the workflows dispatched for it.
pub async fn receive_hook(State(state): State<AppState>, Json(event): Json<HookEvent>) -> impl IntoResponse {
    let timer = RequestTimer::start();
    let matched = state.scheduler.on_hook_event(&event);
    tracing::debug!(hook_type = %event.hook_type, matched = matched.len(), "hook event received");

    timer.success(json!({
        "hook_type": event.hook_type,
        "dispatched": matched,
    }))
}
