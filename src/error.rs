use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Every failure an endpoint can report. All failures are terminal for the
/// request; there are no retries.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} already exists")]
    DuplicateKey(&'static str),

    /// Uniform for unknown identifier and wrong password, so a caller
    /// cannot probe which identifiers exist.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Missing, malformed, expired, or signature-invalid bearer token.
    /// Raised by the extractor before any handler logic runs.
    #[error("Invalid or missing auth token")]
    AuthToken,

    /// Caller is not faculty for a faculty-only action.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::DuplicateKey(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials | ApiError::AuthToken => StatusCode::UNAUTHORIZED,
            ApiError::Unauthorized => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(ref e) = self {
            tracing::error!("internal error: {e:#}");
        }

        let body = json!({
            "success": false,
            "error": self.to_string(),
        });

        (self.status(), Json(body)).into_response()
    }
}
