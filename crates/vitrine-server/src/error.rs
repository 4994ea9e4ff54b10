//! Error types for the HTTP layer.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use vitrine_audit::AuditError;

use crate::projects::ProjectError;

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Audit pipeline failure (query, replay).
    #[error("audit pipeline error: {0}")]
    Audit(#[from] AuditError),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::Audit(AuditError::Transport(_)) => "transport_unavailable",
            ApiError::Audit(_) => "audit_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Audit(AuditError::Transport(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Audit(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ProjectError> for ApiError {
    fn from(err: ProjectError) -> Self {
        match err {
            ProjectError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ProjectError::EmptyTitle => ApiError::InvalidRequest(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitrine_audit::TransportError;

    #[test]
    fn test_error_codes_and_statuses() {
        let cases = [
            (ApiError::from(ProjectError::NotFound(3)), StatusCode::NOT_FOUND, "not_found"),
            (ApiError::from(ProjectError::EmptyTitle), StatusCode::BAD_REQUEST, "invalid_request"),
            (
                ApiError::from(AuditError::Transport(TransportError::Closed("audit.entity".into()))),
                StatusCode::SERVICE_UNAVAILABLE,
                "transport_unavailable",
            ),
            (
                ApiError::from(AuditError::Storage("disk full".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "audit_error",
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status(), status);
            assert_eq!(err.code(), code);
        }
    }
}
