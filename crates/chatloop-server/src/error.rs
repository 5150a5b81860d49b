use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chatloop_core::error::{AgentError, StorageError};
use serde_json::json;

/// Error returned by HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Agent(AgentError),
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        ApiError::Agent(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Agent(err) => match err {
                AgentError::Busy(_) | AgentError::Cancelled => StatusCode::CONFLICT,
                AgentError::Storage(StorageError::InvalidThreadId(_)) => StatusCode::BAD_REQUEST,
                AgentError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
                AgentError::Validation { .. } | AgentError::ToolExecution { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                AgentError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
                AgentError::Reasoning(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::BadRequest(message) => json!({ "error": message, "kind": "bad_request" }),
            ApiError::Agent(err) => json!({ "error": err.to_string(), "kind": err.kind() }),
        };
        if status.is_server_error() {
            tracing::error!(%status, error = %body["error"], "request failed");
        }
        (status, Json(body)).into_response()
    }
}
