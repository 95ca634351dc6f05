use crate::{services::file_repository::RepositoryError, storage::StorageError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Request-level error. Every variant maps to one HTTP status; internal
/// details are logged and never sent to the client.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("file exceeds the maximum size of {}", human_size(*.limit_bytes))]
    TooLarge { limit_bytes: u64 },
    #[error("too many requests, please try again later")]
    RateLimited,
    #[error("file not found or expired")]
    NotFound,
    #[error("verification failed")]
    AuthFailure,
    #[error("{0}")]
    MethodNotAllowed(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Internal(String),
}

/// `5 MB`, `512 KB` or `100 bytes`; fractional units round down to one decimal.
pub fn human_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    let (unit, name) = match bytes {
        b if b >= MIB => (MIB, "MB"),
        b if b >= KIB => (KIB, "KB"),
        _ => return format!("{} bytes", bytes),
    };
    if bytes % unit == 0 {
        format!("{} {}", bytes / unit, name)
    } else {
        let tenths = bytes.saturating_mul(10) / unit;
        format!("{}.{} {}", tenths / 10, tenths % 10, name)
    }
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::AuthFailure => StatusCode::UNAUTHORIZED,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Storage(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show to a client.
    fn public_message(&self) -> String {
        match self {
            AppError::Storage(StorageError::NotFound(_)) => AppError::NotFound.to_string(),
            AppError::Storage(_) => "file storage failed".into(),
            AppError::Database(_) => "database operation failed".into(),
            AppError::Internal(_) => "internal server error".into(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            AppError::Storage(err) if status.is_server_error() => {
                tracing::error!(error = %err, "storage failure")
            }
            AppError::Database(err) => tracing::error!(error = %err, "database failure"),
            AppError::Internal(msg) => tracing::error!(error = %msg, "internal error"),
            _ => tracing::debug!(status = status.as_u16(), error = %self, "request rejected"),
        }

        let body = Json(json!({
            "message": self.public_message(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::CodeSpaceExhausted(attempts) => {
                AppError::internal(format!("no free access code after {} attempts", attempts))
            }
            RepositoryError::Sqlx(err) => AppError::Database(err),
        }
    }
}
