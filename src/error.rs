use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Corrupt idempotency entry: {0}")]
    Decode(String),

    #[error("A request with this idempotency key is still being processed")]
    Conflict,

    #[error("Idempotency key reused with a different request body")]
    FingerprintMismatch,

    #[error("Invalid idempotency key: {0}")]
    InvalidKey(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// True for failures of the key store itself, including corrupt stored data.
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::Redis(_) | AppError::Decode(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Conflict => StatusCode::CONFLICT,
            AppError::FingerprintMismatch => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Idempotent request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Idempotent request rejected");
        }
        status.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_facing_status_codes() {
        assert_eq!(AppError::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::FingerprintMismatch.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::InvalidKey("empty".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Decode("bad".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_decode_counts_as_storage_error() {
        assert!(AppError::Decode("truncated".into()).is_storage_error());
        assert!(!AppError::Conflict.is_storage_error());
        assert!(!AppError::FingerprintMismatch.is_storage_error());
    }

    #[test]
    fn test_rejections_have_empty_body() {
        let response = AppError::Conflict.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(response.headers().get(http::header::CONTENT_TYPE).is_none());
    }
}
