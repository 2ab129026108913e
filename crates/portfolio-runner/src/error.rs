use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use portfolio_stream::ClientError;
use serde_json::json;

/// Request-level failures, rendered as `{ "detail": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    #[error("{0}")]
    Validation(String),
    #[error("unknown company list: {0}")]
    UnknownCategory(String),
    #[error("company list {0} is not loaded on this runner")]
    ListNotLoaded(String),
    #[error("{0}")]
    Analysis(String),
}

impl RunnerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UnknownCategory(_) | Self::ListNotLoaded(_) => StatusCode::NOT_FOUND,
            Self::Analysis(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ClientError> for RunnerError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Validation(message) => Self::Validation(message),
            other => Self::Analysis(other.to_string()),
        }
    }
}

impl IntoResponse for RunnerError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
