//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use devflow_core::workflow::orchestrator::OrchestratorError;
use devflow_types::error::RepositoryError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Orchestrator(OrchestratorError),
    Repository(RepositoryError),
    /// Malformed path parameter or body.
    Validation(String),
    Internal(String),
}

impl From<OrchestratorError> for AppError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::Repository(inner) => AppError::Repository(inner),
            other => AppError::Orchestrator(other),
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Orchestrator(e) => match e {
                OrchestratorError::WorkflowNotFound(_) => (StatusCode::NOT_FOUND, "WORKFLOW_NOT_FOUND"),
                OrchestratorError::WorkflowDisabled(_) => (StatusCode::CONFLICT, "WORKFLOW_DISABLED"),
                OrchestratorError::RunNotFound(_) => (StatusCode::NOT_FOUND, "RUN_NOT_FOUND"),
                OrchestratorError::WaitNotFound { .. } => (StatusCode::NOT_FOUND, "WAIT_NOT_FOUND"),
                OrchestratorError::QueueDropped(_) => (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_DROPPED"),
                OrchestratorError::DependencyUnresolved(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "DEPENDENCY_UNRESOLVED")
                }
                OrchestratorError::Repository(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            },
            AppError::Repository(RepositoryError::NotFound) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Repository(RepositoryError::Conflict(_)) => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::Repository(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Orchestrator(e) => e.to_string(),
            AppError::Repository(e) => e.to_string(),
            AppError::Validation(msg) | AppError::Internal(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(code, error = %message, "request failed");
        } else {
            tracing::debug!(code, error = %message, "request rejected");
        }
        ApiResponse::error(status, code, &message, Uuid::now_v7().to_string(), 0).into_response()
    }
}
