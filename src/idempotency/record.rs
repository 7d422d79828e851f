use crate::error::{AppError, Result};
use anyhow::anyhow;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::fingerprint::Fingerprint;

pub(crate) const FIELD_FINGERPRINT: &str = "fingerprint";
pub(crate) const FIELD_STATUS: &str = "status";
pub(crate) const FIELD_CREATED_AT: &str = "created_at";
pub(crate) const FIELD_RESPONSE_STATUS: &str = "response_status";
pub(crate) const FIELD_RESPONSE_BODY: &str = "response_body";
pub(crate) const FIELD_CONTENT_TYPE: &str = "content_type";
pub(crate) const FIELD_COMPLETED_AT: &str = "completed_at";

/// Lifecycle status of an idempotency record. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IdempotencyStatus {
    Processing,
    Completed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::Processing => "PROCESSING",
            IdempotencyStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PROCESSING" => Some(IdempotencyStatus::Processing),
            "COMPLETED" => Some(IdempotencyStatus::Completed),
            _ => None,
        }
    }
}

/// Stored idempotency record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub fingerprint: Fingerprint,
    pub status: IdempotencyStatus,
    pub response_status_code: Option<u16>,
    pub response_body: Option<Bytes>,
    pub content_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Remaining lifetime as reported by the store.
    pub ttl: Option<Duration>,
}

impl IdempotencyRecord {
    pub fn processing(key: impl Into<String>, fingerprint: Fingerprint, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            fingerprint,
            status: IdempotencyStatus::Processing,
            response_status_code: None,
            response_body: None,
            content_type: None,
            created_at: Utc::now(),
            completed_at: None,
            ttl: Some(ttl),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == IdempotencyStatus::Completed
    }

    pub fn is_processing(&self) -> bool {
        self.status == IdempotencyStatus::Processing
    }

    /// Fields written when the record is first inserted.
    pub(crate) fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            (FIELD_FINGERPRINT.to_string(), self.fingerprint.as_str().to_string()),
            (FIELD_STATUS.to_string(), self.status.as_str().to_string()),
            (FIELD_CREATED_AT.to_string(), self.created_at.to_rfc3339()),
        ]
    }

    pub(crate) fn from_fields(
        key: &str,
        mut fields: HashMap<String, String>,
        ttl: Option<Duration>,
    ) -> Result<Self> {
        let fingerprint = fields
            .remove(FIELD_FINGERPRINT)
            .map(Fingerprint::from_hex)
            .ok_or_else(|| malformed(key, FIELD_FINGERPRINT))?;

        let status = fields
            .get(FIELD_STATUS)
            .and_then(|s| IdempotencyStatus::parse(s))
            .ok_or_else(|| malformed(key, FIELD_STATUS))?;

        let created_at = fields
            .get(FIELD_CREATED_AT)
            .and_then(|s| parse_timestamp(s))
            .ok_or_else(|| malformed(key, FIELD_CREATED_AT))?;

        let response_status_code = match fields.get(FIELD_RESPONSE_STATUS) {
            Some(s) => Some(
                s.parse::<u16>()
                    .map_err(|_| malformed(key, FIELD_RESPONSE_STATUS))?,
            ),
            None => None,
        };

        let response_body = match fields.get(FIELD_RESPONSE_BODY) {
            Some(s) => Some(Bytes::from(
                hex::decode(s).map_err(|_| malformed(key, FIELD_RESPONSE_BODY))?,
            )),
            None => None,
        };

        Ok(Self {
            key: key.to_string(),
            fingerprint,
            status,
            response_status_code,
            response_body,
            content_type: fields.remove(FIELD_CONTENT_TYPE),
            created_at,
            completed_at: fields.get(FIELD_COMPLETED_AT).and_then(|s| parse_timestamp(s)),
            ttl,
        })
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn malformed(key: &str, field: &str) -> AppError {
    AppError::Internal(anyhow!(
        "Idempotency record {} has a missing or malformed `{}` field",
        key,
        field
    ))
}
