use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::providers::ProviderError;

#[derive(Error, Debug)]
pub enum AppError {
    /// Bad payload or bad request shape. Rejected before any task is written.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Caller does not own the project.
    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Provider rejected the job: {0}")]
    ProviderRejected(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Too many requests: {0}")]
    RateLimited(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ProviderError> for AppError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::InvalidCallback(msg) => AppError::MalformedPayload(msg),
            e if e.is_transient() => AppError::ProviderUnavailable(e.to_string()),
            e => AppError::ProviderRejected(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
            AppError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            AppError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            AppError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AppError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            AppError::ProviderRejected(_) => StatusCode::BAD_GATEWAY,
            AppError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Storage details stay in the logs.
        let error_message = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Internal storage error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let response = AppError::Validation("max_clips".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn transient_provider_error_maps_to_unavailable() {
        let err: AppError = ProviderError::Transient("connection reset".to_string()).into();
        assert!(matches!(err, AppError::ProviderUnavailable(_)));
    }

    #[test]
    fn rejected_provider_error_maps_to_rejected() {
        let err: AppError = ProviderError::Rejected {
            code: "4003".to_string(),
            message: "video too long".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::ProviderRejected(_)));
    }
}
