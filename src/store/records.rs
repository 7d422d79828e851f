use crate::error::{AppError, Result};
use crate::idempotency::capture::CapturedResponse;
use crate::idempotency::fingerprint::Fingerprint;
use crate::idempotency::record::{
    IdempotencyRecord, IdempotencyStatus, FIELD_COMPLETED_AT, FIELD_CONTENT_TYPE,
    FIELD_RESPONSE_BODY, FIELD_RESPONSE_STATUS, FIELD_STATUS,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use super::cache_store::CacheStore;

/// Idempotency records on top of a [`CacheStore`].
#[derive(Clone)]
pub struct RecordStore {
    cache: Arc<dyn CacheStore>,
    key_prefix: String,
}

impl RecordStore {
    pub fn new(cache: Arc<dyn CacheStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.into(),
        }
    }

    fn make_key(&self, idempotency_key: &str) -> String {
        format!("{}:record:{}", self.key_prefix, idempotency_key)
    }

    /// Finds a live record by idempotency key.
    pub async fn get(&self, idempotency_key: &str) -> Result<Option<IdempotencyRecord>> {
        let key = self.make_key(idempotency_key);
        let Some(fields) = self.cache.get_fields(&key).await? else {
            return Ok(None);
        };
        let ttl = self.cache.time_to_live(&key).await?;

        IdempotencyRecord::from_fields(idempotency_key, fields, ttl).map(Some)
    }

    /// Inserts a PROCESSING record. Fails with `AlreadyExists` if any live
    /// record holds the key. The TTL is fixed here and never refreshed.
    pub async fn put_processing(
        &self,
        idempotency_key: &str,
        fingerprint: &Fingerprint,
        ttl: Duration,
    ) -> Result<IdempotencyRecord> {
        let record = IdempotencyRecord::processing(idempotency_key, fingerprint.clone(), ttl);

        let created = self
            .cache
            .create_fields(&self.make_key(idempotency_key), record.to_fields(), ttl)
            .await?;

        if !created {
            return Err(AppError::AlreadyExists(idempotency_key.to_string()));
        }
        Ok(record)
    }

    /// Moves a PROCESSING record to COMPLETED with its response. Fails with
    /// `NotFound` when no PROCESSING record exists for the key.
    pub async fn complete(&self, idempotency_key: &str, response: &CapturedResponse) -> Result<()> {
        let mut fields = vec![
            (
                FIELD_STATUS.to_string(),
                IdempotencyStatus::Completed.as_str().to_string(),
            ),
            (
                FIELD_RESPONSE_STATUS.to_string(),
                response.status_code.to_string(),
            ),
            (FIELD_RESPONSE_BODY.to_string(), hex::encode(&response.body)),
            (FIELD_COMPLETED_AT.to_string(), Utc::now().to_rfc3339()),
        ];
        if let Some(ref content_type) = response.content_type {
            fields.push((FIELD_CONTENT_TYPE.to_string(), content_type.clone()));
        }

        let updated = self
            .cache
            .update_fields_if(
                &self.make_key(idempotency_key),
                FIELD_STATUS,
                IdempotencyStatus::Processing.as_str(),
                fields,
            )
            .await?;

        if !updated {
            return Err(AppError::NotFound(format!(
                "No processing idempotency record for key {}",
                idempotency_key
            )));
        }
        Ok(())
    }
}
