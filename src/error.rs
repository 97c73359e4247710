//! API error taxonomy.
//!
//! Every handler returns `Result<_, ApiError>`; the `IntoResponse` impl maps
//! each variant to a status code and a `{"error": "..."}` JSON body. Internal
//! errors are logged with their full chain and surfaced as a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A required field is missing or malformed. Raised before any external
    /// call is made.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or invalid session token.
    #[error("unauthorized")]
    Unauthorized,

    /// Unknown row, or a row the caller is not allowed to see — the two are
    /// indistinguishable on purpose.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The caller is known but not permitted (cross-user repo operations).
    #[error("{0}")]
    Forbidden(String),

    /// An upstream collaborator (forge API, completion API, indexing
    /// service) reported a failure.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Database, filesystem, or git failure. Chain logged, generic body.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(e) => {
                error!(err = ?e, "internal error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(anyhow::Error::new(e).context("database query failed"))
    }
}
