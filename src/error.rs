use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider timed out: {0}")]
    Timeout(String),

    #[error("Insufficient candidates: found {found}, need at least {required}")]
    InsufficientCandidates { found: usize, required: usize },

    #[error("No walking route between {from} and {to}")]
    UnreachableLeg { from: String, to: String },

    #[error("Route violates constraints: {0}")]
    ConstraintViolation(String),

    #[error("Cache I/O error: {0}")]
    CacheIo(String),

    #[error("Invalid edit: {0}")]
    InvalidEdit(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the same call may succeed if retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ProviderUnavailable(_) | AppError::Timeout(_))
    }
}

// Convert AppError into HTTP responses
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retryable = self.is_retryable();
        let (status, error_message) = match self {
            AppError::ProviderUnavailable(ref e) => {
                tracing::warn!("Provider unavailable: {}", e);
                (StatusCode::BAD_GATEWAY, "Upstream provider unavailable".to_string())
            }
            AppError::Timeout(ref e) => {
                tracing::warn!("Provider timeout: {}", e);
                (StatusCode::GATEWAY_TIMEOUT, "Upstream provider timed out".to_string())
            }
            AppError::InsufficientCandidates { found, required } => {
                tracing::info!(found, required, "Not enough candidate places");
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Not enough places found; try fewer stops or a wider area".to_string(),
                )
            }
            ref e @ AppError::UnreachableLeg { .. } => {
                tracing::info!("{}", e);
                (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            AppError::ConstraintViolation(ref e) => {
                (StatusCode::UNPROCESSABLE_ENTITY, e.clone())
            }
            AppError::CacheIo(ref e) => {
                tracing::error!("Cache error escaped the cache layer: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cache error".to_string())
            }
            AppError::InvalidEdit(ref e) => (StatusCode::CONFLICT, e.clone()),
            AppError::Cancelled(ref e) => (StatusCode::CONFLICT, e.clone()),
            AppError::InvalidRequest(ref e) => (StatusCode::BAD_REQUEST, e.clone()),
            AppError::NotFound(ref e) => (StatusCode::NOT_FOUND, e.clone()),
            AppError::Internal(ref e) => {
                tracing::error!("Internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": status.canonical_reason().unwrap_or("Unknown error"),
            "message": error_message,
            "retryable": retryable,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
