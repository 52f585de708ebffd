//! Axum router configuration with middleware.
//!
//! All engine routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Workflows
        .route("/workflows", get(handlers::workflow::list_workflows))
        .route("/workflows/reload", post(handlers::workflow::reload_workflows))
        .route(
            "/workflows/{id}/trigger",
            post(handlers::workflow::trigger_workflow),
        )
        // Runs
        .route("/runs", get(handlers::run::list_active_runs))
        .route("/runs/{id}", get(handlers::run::get_run))
        .route("/runs/{id}/cancel", post(handlers::run::cancel_run))
        .route(
            "/runs/{id}/steps/{step_id}/approve",
            post(handlers::run::approve_step),
        )
        // Lifecycle hooks
        .route("/hooks", post(handlers::hook::receive_hook));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;
    use uuid::Uuid;

    use devflow_types::config::EngineConfig;

    fn write_workflow(data_dir: &Path, id: &str, yaml: &str) {
        let dir = data_dir.join("workflows");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{id}.yaml")), yaml).unwrap();
    }

    fn test_state(tmp: &TempDir) -> AppState {
        AppState::from_config(tmp.path().to_path_buf(), EngineConfig::default(), Some(tmp.path())).unwrap()
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let body = match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        };
        let response = router.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn wait_for_run(state: &AppState, run_id: Uuid) {
        if let Some(handle) = state.orchestrator.run_handle(run_id) {
            tokio::time::timeout(Duration::from_secs(10), handle.wait())
                .await
                .expect("run should finish");
        }
    }

    #[tokio::test]
    async fn health_reports_version() {
        let tmp = TempDir::new().unwrap();
        let router = build_router(test_state(&tmp));
        let (status, body) = send(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn lists_workflows_in_envelope() {
        let tmp = TempDir::new().unwrap();
        write_workflow(
            tmp.path(),
            "lint",
            "id: lint\nname: Lint\ntrigger: { type: cron, value: '*/5 * * * *' }\nsteps:\n  - { id: run, type: shell, config: { command: 'true' } }\n",
        );
        let router = build_router(test_state(&tmp));

        let (status, body) = send(&router, "GET", "/api/v1/workflows", None).await;
        assert_eq!(status, StatusCode::OK);
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "lint");
        assert_eq!(rows[0]["trigger"], "cron");
        assert_eq!(rows[0]["steps"], 1);
        assert_eq!(body["_links"]["self"], "/api/v1/workflows");
        assert!(body["meta"]["request_id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn trigger_runs_workflow_and_records_history() {
        let tmp = TempDir::new().unwrap();
        write_workflow(
            tmp.path(),
            "greet",
            "id: greet\nname: Greet\nsteps:\n  - { id: hello, type: shell, config: { command: 'echo hello' } }\n",
        );
        let state = test_state(&tmp);
        let router = build_router(state.clone());

        let (status, body) = send(
            &router,
            "POST",
            "/api/v1/workflows/greet/trigger",
            Some(json!({ "payload": { "who": "ci" } })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["data"]["status"], "started");
        let run_id: Uuid = body["data"]["run_id"].as_str().unwrap().parse().unwrap();
        wait_for_run(&state, run_id).await;

        let (status, body) = send(&router, "GET", &format!("/api/v1/runs/{run_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["run"]["status"], "success");
        assert_eq!(body["data"]["run"]["trigger_data"]["who"], "ci");
        assert_eq!(body["data"]["active"], false);
    }

    #[tokio::test]
    async fn trigger_resolves_project_path() {
        let tmp = TempDir::new().unwrap();
        write_workflow(
            tmp.path(),
            "noop",
            "id: noop\nname: Noop\nsteps:\n  - { id: s, type: shell, config: { command: 'true' } }\n",
        );
        let project = tmp.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        let state = test_state(&tmp);
        let router = build_router(state.clone());

        let (status, body) = send(
            &router,
            "POST",
            "/api/v1/workflows/noop/trigger",
            Some(json!({ "project_path": "/no/such/project" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");

        let indirect = project.join("..").join("project");
        let (status, body) = send(
            &router,
            "POST",
            "/api/v1/workflows/noop/trigger",
            Some(json!({ "project_path": indirect })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let run_id: Uuid = body["data"]["run_id"].as_str().unwrap().parse().unwrap();
        wait_for_run(&state, run_id).await;

        let (_, body) = send(&router, "GET", &format!("/api/v1/runs/{run_id}"), None).await;
        let expected = project.canonicalize().unwrap();
        assert_eq!(body["data"]["run"]["project_path"], expected.display().to_string());
    }

    #[tokio::test]
    async fn trigger_without_body_is_accepted() {
        let tmp = TempDir::new().unwrap();
        write_workflow(
            tmp.path(),
            "noop",
            "id: noop\nname: Noop\nsteps:\n  - { id: s, type: shell, config: { command: 'true' } }\n",
        );
        let state = test_state(&tmp);
        let router = build_router(state.clone());

        let (status, body) = send(&router, "POST", "/api/v1/workflows/noop/trigger", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let run_id: Uuid = body["data"]["run_id"].as_str().unwrap().parse().unwrap();
        wait_for_run(&state, run_id).await;
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let tmp = TempDir::new().unwrap();
        write_workflow(
            tmp.path(),
            "off",
            "id: off\nname: Off\nenabled: false\nsteps:\n  - { id: s, type: shell, config: { command: 'true' } }\n",
        );
        let router = build_router(test_state(&tmp));

        let (status, body) = send(&router, "POST", "/api/v1/workflows/ghost/trigger", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "WORKFLOW_NOT_FOUND");

        let (status, body) = send(&router, "POST", "/api/v1/workflows/off/trigger", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errors"][0]["code"], "WORKFLOW_DISABLED");

        let (status, body) = send(&router, "POST", "/api/v1/runs/not-a-uuid/cancel", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");

        let missing = Uuid::now_v7();
        let (status, body) = send(&router, "POST", &format!("/api/v1/runs/{missing}/cancel"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "RUN_NOT_FOUND");

        let (status, _) = send(&router, "GET", &format!("/api/v1/runs/{missing}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &router,
            "POST",
            &format!("/api/v1/runs/{missing}/steps/gate/approve"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "WAIT_NOT_FOUND");

        let (status, body) = send(
            &router,
            "POST",
            "/api/v1/workflows/off/trigger",
            Some(json!("{ not json")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn approve_resumes_waiting_run() {
        let tmp = TempDir::new().unwrap();
        write_workflow(
            tmp.path(),
            "gated",
            "id: gated\nname: Gated\nsteps:\n  - { id: gate, type: wait, config: { message: 'ship it?' } }\n",
        );
        let state = test_state(&tmp);
        let router = build_router(state.clone());

        let (_, body) = send(&router, "POST", "/api/v1/workflows/gated/trigger", None).await;
        let run_id: Uuid = body["data"]["run_id"].as_str().unwrap().parse().unwrap();

        let (status, body) = send(&router, "GET", "/api/v1/runs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["workflow_id"], "gated");

        let uri = format!("/api/v1/runs/{run_id}/steps/gate/approve");
        let mut approved = false;
        for _ in 0..200 {
            let (status, _) = send(&router, "POST", &uri, Some(json!({ "data": { "by": "ops" } }))).await;
            if status == StatusCode::OK {
                approved = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(approved);
        wait_for_run(&state, run_id).await;

        let (_, body) = send(&router, "GET", &format!("/api/v1/runs/{run_id}"), None).await;
        assert_eq!(body["data"]["run"]["status"], "success");
    }

    #[tokio::test]
    async fn cancel_stops_active_run() {
        let tmp = TempDir::new().unwrap();
        write_workflow(
            tmp.path(),
            "hold",
            "id: hold\nname: Hold\nsteps:\n  - { id: gate, type: wait, config: { message: 'hold' } }\n",
        );
        let state = test_state(&tmp);
        let router = build_router(state.clone());

        let (_, body) = send(&router, "POST", "/api/v1/workflows/hold/trigger", None).await;
        let run_id: Uuid = body["data"]["run_id"].as_str().unwrap().parse().unwrap();

        let (status, body) = send(&router, "POST", &format!("/api/v1/runs/{run_id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["cancelled"], true);
        wait_for_run(&state, run_id).await;

        let (_, body) = send(&router, "GET", &format!("/api/v1/runs/{run_id}"), None).await;
        assert_eq!(body["data"]["run"]["status"], "cancelled");
    }

    #[tokio::test]
    async fn hook_dispatches_matching_workflows() {
        let tmp = TempDir::new().unwrap();
        write_workflow(
            tmp.path(),
            "on-commit",
            "id: on-commit\nname: On Commit\ntrigger: { type: hook, hook_type: post_commit }\nsteps:\n  - { id: s, type: shell, config: { command: 'true' } }\n",
        );
        write_workflow(
            tmp.path(),
            "on-stop",
            "id: on-stop\nname: On Stop\ntrigger: { type: hook, hook_type: stop }\nsteps:\n  - { id: s, type: shell, config: { command: 'true' } }\n",
        );
        let state = test_state(&tmp);
        let router = build_router(state.clone());

        let (status, body) = send(&router, "POST", "/api/v1/workflows/reload", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["workflows"], 2);

        let (status, body) = send(
            &router,
            "POST",
            "/api/v1/hooks",
            Some(json!({ "type": "post_commit", "sha": "abc123" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["dispatched"], json!(["on-commit"]));
    }
}
