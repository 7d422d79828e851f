use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topics for idempotency events.
pub mod topics {
    pub const COMPLETED: &str = "idempotency.completed";
}

/// Type of idempotency event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    OperationCompleted,
}

/// Envelope wrapping all events with common metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub correlation_id: Option<String>,
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(event_type: EventType, payload: T) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            source: "idempotency-engine".to_string(),
            correlation_id: None,
            payload,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Audit notification for one operation that ran and was recorded COMPLETED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedOperation {
    pub idempotency_key: String,
    pub fingerprint: String,
    pub operation: String,
    pub resource: String,
    pub response_status_code: u16,
    pub response_size_bytes: usize,
    /// Present when the body is valid UTF-8.
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl CompletedOperation {
    pub fn into_envelope(self) -> EventEnvelope<CompletedOperation> {
        let key = self.idempotency_key.clone();
        EventEnvelope::new(EventType::OperationCompleted, self).with_correlation_id(key)
    }
}
