use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::idempotency::StatsSnapshot;
use crate::observability::AggregatedHealth;

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: ErrorResponse) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        // Server-side failures are logged, not echoed to the client.
        let message = if err.status_code().is_server_error() {
            match err {
                AppError::StoreUnavailable(_) => "Idempotency store unavailable".to_string(),
                _ => "An internal error occurred".to_string(),
            }
        } else {
            err.to_string()
        };

        ErrorResponse::new(err.error_code(), message).retryable(err.is_retryable())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {:#}", self);
        }

        let body = ApiResponse::<()>::error(ErrorResponse::from(&self));
        (status, Json(body)).into_response()
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub health: AggregatedHealth,
    pub engine: StatsSnapshot,
}

/// Body returned by the demo echo resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoResponse {
    pub id: Uuid,
    pub received: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Liveness/readiness status body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub status: StatusLabel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLabel {
    Ok,
    Unavailable,
}

impl IntoResponse for ProbeResponse {
    fn into_response(self) -> Response {
        let status = match self.status {
            StatusLabel::Ok => StatusCode::OK,
            StatusLabel::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(self)).into_response()
    }
}
