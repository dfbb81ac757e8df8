//! Application Error Types
//!
//! Centralized error handling with Axum integration and wire-frame mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("Bus unavailable: {0}")]
    BusUnavailable(#[from] redis::RedisError),

    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Error kind string carried in protocol `error` frames.
    pub fn wire_kind(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "unauthorized",
            AppError::InvalidMessage(_) => "invalid_message",
            AppError::NotFound(_) => "not_found",
            AppError::StorageUnavailable(_) => "storage_unavailable",
            AppError::BusUnavailable(_) => "bus_unavailable",
            AppError::QueueUnavailable(_) => "queue_unavailable",
            AppError::Internal(_) => "internal",
        }
    }

    /// Detail string safe to show to a client. Infrastructure errors are
    /// logged server-side and reduced on the wire.
    pub fn wire_detail(&self) -> String {
        match self {
            AppError::Unauthorized(msg)
            | AppError::InvalidMessage(msg)
            | AppError::NotFound(msg) => msg.clone(),
            AppError::StorageUnavailable(e) => {
                tracing::error!("Storage error: {}", e);
                "message store unavailable, retry".into()
            }
            AppError::BusUnavailable(e) => {
                tracing::error!("Bus error: {}", e);
                "fanout degraded".into()
            }
            AppError::QueueUnavailable(msg) => {
                tracing::error!("Queue error: {}", msg);
                "job queue unavailable".into()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "internal error".into()
            }
        }
    }

    /// Whether the caller may safely retry the whole operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::StorageUnavailable(_)
                | AppError::BusUnavailable(_)
                | AppError::QueueUnavailable(_)
        )
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, 20001, msg.clone()),
            AppError::InvalidMessage(msg) => (StatusCode::BAD_REQUEST, 20002, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, 20003, msg.clone()),
            AppError::StorageUnavailable(e) => {
                tracing::error!("Storage error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, 20004, "Storage unavailable".into())
            }
            AppError::BusUnavailable(e) => {
                tracing::error!("Bus error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, 20005, "Bus unavailable".into())
            }
            AppError::QueueUnavailable(msg) => {
                tracing::error!("Queue error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, 20006, "Queue unavailable".into())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 20000, "Internal server error".into())
            }
        };

        let body = ErrorResponse { code, message };

        (status, Json(body)).into_response()
    }
}
