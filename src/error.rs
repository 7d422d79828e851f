use axum::http::StatusCode;
use thiserror::Error;

/// Errors surfaced by the idempotency engine and its collaborators.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing idempotency key header: {0}")]
    MissingKey(String),

    #[error("Invalid idempotency key: {0}")]
    InvalidKey(String),

    #[error("Idempotency key {key} is locked by a concurrent request")]
    LockContended { key: String },

    #[error("Request with idempotency key {key} is already being processed")]
    AlreadyProcessing { key: String },

    #[error("Idempotency key {key} was reused with different request parameters")]
    FingerprintMismatch { key: String },

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cache store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Handler failed: {0}")]
    HandlerFailure(#[source] anyhow::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rskafka::client::error::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }
}

impl AppError {
    /// HTTP status the host should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingKey(_) | AppError::InvalidKey(_) | AppError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::LockContended { .. } | AppError::AlreadyProcessing { .. } => {
                StatusCode::CONFLICT
            }
            AppError::FingerprintMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::AlreadyExists(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::HandlerFailure(_)
            | AppError::Config(_)
            | AppError::Kafka(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code used in error bodies and metric labels.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::MissingKey(_) => "MISSING_IDEMPOTENCY_KEY",
            AppError::InvalidKey(_) => "INVALID_IDEMPOTENCY_KEY",
            AppError::LockContended { .. } => "LOCK_CONTENDED",
            AppError::AlreadyProcessing { .. } => "ALREADY_PROCESSING",
            AppError::FingerprintMismatch { .. } => "FINGERPRINT_MISMATCH",
            AppError::AlreadyExists(_) => "ALREADY_EXISTS",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            AppError::HandlerFailure(_) => "HANDLER_FAILURE",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Kafka(_) => "KAFKA_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the caller may resubmit the same request after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::LockContended { .. }
                | AppError::AlreadyProcessing { .. }
                | AppError::StoreUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::MissingKey("idempotency-key".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::LockContended { key: "k".into() }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::AlreadyProcessing { key: "k".into() }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::FingerprintMismatch { key: "k".into() }.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::StoreUnavailable("down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::PayloadTooLarge("body".into()).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::LockContended { key: "k".into() }.is_retryable());
        assert!(AppError::StoreUnavailable("down".into()).is_retryable());
        assert!(!AppError::FingerprintMismatch { key: "k".into() }.is_retryable());
        assert!(!AppError::MissingKey("h".into()).is_retryable());
    }

    #[test]
    fn test_redis_error_is_store_unavailable() {
        let err: AppError =
            redis::RedisError::from((redis::ErrorKind::IoError, "connection refused")).into();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
    }
}
