//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use flowrun_core::workflow::{EngineError, WorkflowError};

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Engine(EngineError),
    Workflow(WorkflowError),
    /// A named resource (agent, workflow) does not exist.
    NotFound(String),
    /// Malformed request.
    Validation(String),
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl From<WorkflowError> for AppError {
    fn from(e: WorkflowError) -> Self {
        AppError::Workflow(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, Option<serde_json::Value>) {
        match self {
            AppError::Engine(EngineError::UnknownWorkflow(_)) => {
                (StatusCode::NOT_FOUND, "WORKFLOW_NOT_FOUND", None)
            }
            AppError::Engine(EngineError::InvalidWorkflow(report))
            | AppError::Workflow(WorkflowError::Validation(report)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_WORKFLOW",
                serde_json::to_value(&report.issues).ok(),
            ),
            AppError::Engine(EngineError::RunNotFound(_)) => {
                (StatusCode::NOT_FOUND, "RUN_NOT_FOUND", None)
            }
            AppError::Engine(EngineError::RunActive(_)) => {
                (StatusCode::CONFLICT, "RUN_ACTIVE", None)
            }
            AppError::Workflow(WorkflowError::Parse(_)) => {
                (StatusCode::BAD_REQUEST, "PARSE_ERROR", None)
            }
            AppError::Workflow(WorkflowError::Io(_)) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None)
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", None),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", None),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Engine(e) => e.to_string(),
            AppError::Workflow(e) => e.to_string(),
            AppError::NotFound(msg) | AppError::Validation(msg) | AppError::Internal(msg) => {
                msg.clone()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, details) = self.parts();
        if status.is_server_error() {
            tracing::error!(error = %self.message(), "request failed");
        }
        let body = ApiResponse::error(code, self.message(), details);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_types::error::{IssueCode, ValidationIssue, ValidationReport};
    use uuid::Uuid;

    #[test]
    fn engine_errors_map_to_statuses() {
        let missing = AppError::from(EngineError::RunNotFound(Uuid::now_v7()));
        assert_eq!(missing.parts().0, StatusCode::NOT_FOUND);
        assert_eq!(missing.parts().1, "RUN_NOT_FOUND");

        let unknown = AppError::from(EngineError::UnknownWorkflow("x".into()));
        assert_eq!(unknown.parts().1, "WORKFLOW_NOT_FOUND");

        let active = AppError::from(EngineError::RunActive(Uuid::now_v7()));
        assert_eq!(active.parts().0, StatusCode::CONFLICT);
        assert_eq!(active.parts().1, "RUN_ACTIVE");
    }

    #[test]
    fn invalid_workflow_carries_issues() {
        let mut report = ValidationReport::new(Some("wf".into()));
        report.push(ValidationIssue::new(
            IssueCode::ForwardReference,
            Some("b"),
            "input_from 'c' refers to a later step",
        ));
        let err = AppError::from(EngineError::InvalidWorkflow(report));
        let (status, code, details) = err.parts();
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(code, "INVALID_WORKFLOW");
        let details = details.unwrap();
        assert_eq!(details[0]["code"], "forward_reference");
        assert_eq!(details[0]["step_id"], "b");
    }

    #[test]
    fn parse_errors_are_bad_requests() {
        let err = AppError::from(WorkflowError::Parse("bad yaml".into()));
        assert_eq!(err.parts().0, StatusCode::BAD_REQUEST);
        assert!(err.message().contains("bad yaml"));
    }
}
