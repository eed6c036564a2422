//! Mapping of investigation errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::types::ErrorBody;
use crate::investigation::InvestigationError;

fn status_code(err: &InvestigationError) -> StatusCode {
    match err {
        InvestigationError::Unauthorized => StatusCode::UNAUTHORIZED,
        InvestigationError::BadRequest(_) => StatusCode::BAD_REQUEST,
        InvestigationError::NotFound(_) | InvestigationError::NoMetrics { .. } => {
            StatusCode::NOT_FOUND
        }
        InvestigationError::Forbidden(_) => StatusCode::FORBIDDEN,
        InvestigationError::AgentUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InvestigationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        InvestigationError::Upstream(_)
        | InvestigationError::AgentExecution(_)
        | InvestigationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn body(err: &InvestigationError) -> ErrorBody {
    let (error, details) = match err {
        InvestigationError::Unauthorized => ("Unauthorized".to_string(), None),
        InvestigationError::BadRequest(msg)
        | InvestigationError::NotFound(msg)
        | InvestigationError::Forbidden(msg) => (msg.clone(), None),
        InvestigationError::AgentUnavailable { .. } => (
            "Agent not connected via WebSocket".to_string(),
            Some(err.to_string()),
        ),
        InvestigationError::NoMetrics { .. } => (
            "No metrics available for agent".to_string(),
            Some(err.to_string()),
        ),
        InvestigationError::Upstream(msg) => {
            ("Failed to get AI response".to_string(), Some(msg.clone()))
        }
        InvestigationError::AgentExecution(msg) => {
            ("Agent execution failed".to_string(), Some(msg.clone()))
        }
        InvestigationError::Timeout(_) => (
            "Timed out waiting for agent results".to_string(),
            Some(err.to_string()),
        ),
        InvestigationError::Internal(msg) => {
            ("Internal server error".to_string(), Some(msg.clone()))
        }
    };
    ErrorBody { error, details }
}

impl IntoResponse for InvestigationError {
    fn into_response(self) -> Response {
        let status = status_code(&self);
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "Request failed: {}", self);
        }
        (status, Json(body(&self))).into_response()
    }
}
