use crate::error::{AppError, Result};
use crate::events::{CompletedOperation, SinkDispatcher};
use crate::observability::{get_metrics, mask_sensitive, LatencyTimer};
use crate::store::{CacheStore, LockManager, RecordStore};
use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use super::capture::{CapturedResponse, ResponseCapture, ResponseSink};
use super::fingerprint::{Fingerprint, IdempotencyKey};
use super::record::{IdempotencyRecord, IdempotencyStatus};
use super::stats::EngineStats;

/// Default request header carrying the idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Header set on responses served from a completed record.
pub const IDEMPOTENCY_REPLAYED_HEADER: &str = "idempotency-replayed";

/// Configuration for the idempotency engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub key_prefix: String,
    pub lock_lease: Duration,
    pub record_ttl: Duration,
    pub methods: HashSet<Method>,
    pub header_name: String,
    pub max_key_length: usize,
    pub max_capture_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            key_prefix: "idem".to_string(),
            lock_lease: Duration::from_secs(30),
            record_ttl: Duration::from_secs(86400), // 24 hours
            methods: [Method::POST, Method::PUT, Method::PATCH, Method::DELETE]
                .into_iter()
                .collect(),
            header_name: IDEMPOTENCY_KEY_HEADER.to_string(),
            max_key_length: 255,
            max_capture_bytes: 1024 * 1024,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lock_lease.is_zero() {
            return Err(AppError::Validation("lock lease must be positive".to_string()));
        }
        if self.record_ttl < self.lock_lease {
            return Err(AppError::Validation(format!(
                "record TTL ({:?}) must be at least the lock lease ({:?})",
                self.record_ttl, self.lock_lease
            )));
        }
        if self.header_name.trim().is_empty() {
            return Err(AppError::Validation("idempotency header name cannot be empty".to_string()));
        }
        if self.max_key_length == 0 {
            return Err(AppError::Validation("max key length must be positive".to_string()));
        }
        Ok(())
    }

    pub fn requires_idempotency(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// Lock lease rounded up to whole seconds, for `Retry-After`.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.lock_lease.as_secs();
        if self.lock_lease.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs.max(1)
        }
    }
}

/// Transport-independent view of an inbound request.
#[derive(Debug, Clone)]
pub struct IdempotentRequest {
    pub method: Method,
    pub resource: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IdempotentRequest {
    pub fn new(method: Method, resource: impl Into<String>) -> Self {
        Self {
            method,
            resource: resource.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the default idempotency header. A key that cannot be carried
    /// in a header value is `InvalidKey`.
    pub fn with_idempotency_key(mut self, key: &str) -> Result<Self> {
        let value = HeaderValue::from_str(key)
            .map_err(|_| AppError::InvalidKey("key is not a valid header value".to_string()))?;
        self.headers
            .insert(HeaderName::from_static(IDEMPOTENCY_KEY_HEADER), value);
        Ok(self)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// The wrapped business handler, or the next stage of a host pipeline.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        request: &IdempotentRequest,
        sink: &mut dyn ResponseSink,
    ) -> anyhow::Result<()>;
}

/// How a request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Method is not guarded; the handler ran without enforcement.
    Bypassed,
    /// The handler ran for this request.
    Executed { status_code: u16 },
    /// The stored response of an earlier execution was written.
    Replayed { status_code: u16 },
}

impl Disposition {
    pub fn handler_invoked(&self) -> bool {
        !matches!(self, Disposition::Replayed { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            Disposition::Bypassed => "bypassed",
            Disposition::Executed { .. } => "executed",
            Disposition::Replayed { .. } => "replayed",
        }
    }
}

/// Request interceptor enforcing at-most-once execution per idempotency key.
pub struct IdempotencyEngine {
    records: RecordStore,
    locks: LockManager,
    sink: Option<SinkDispatcher>,
    stats: Arc<EngineStats>,
    config: EngineConfig,
}

impl IdempotencyEngine {
    pub fn new(cache: Arc<dyn CacheStore>, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            records: RecordStore::new(cache.clone(), config.key_prefix.clone()),
            locks: LockManager::new(cache, config.key_prefix.clone()),
            sink: None,
            stats: Arc::new(EngineStats::new()),
            config,
        })
    }

    /// Enables fire-and-forget audit notifications for completed operations.
    pub fn with_sink(mut self, dispatcher: SinkDispatcher) -> Self {
        self.sink = Some(dispatcher);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Runs `handler` for `request` at most once per idempotency key.
    ///
    /// Short-circuits with an error for missing or invalid keys, contended
    /// locks, in-flight duplicates, fingerprint mismatches and store
    /// failures. Completed duplicates are answered by writing the stored
    /// response into `sink`.
    pub async fn handle(
        &self,
        request: &IdempotentRequest,
        handler: &dyn Handler,
        sink: &mut dyn ResponseSink,
    ) -> Result<Disposition> {
        self.stats.record_request();

        let result = self.dispatch(request, handler, sink).await;
        let outcome = match &result {
            Ok(disposition) => disposition.label(),
            Err(e) => e.error_code(),
        };
        get_metrics().record_request_outcome(outcome);
        result
    }

    async fn dispatch(
        &self,
        request: &IdempotentRequest,
        handler: &dyn Handler,
        sink: &mut dyn ResponseSink,
    ) -> Result<Disposition> {
        if !self.config.requires_idempotency(&request.method) {
            self.stats.record_bypassed();
            handler
                .handle(request, sink)
                .await
                .map_err(AppError::HandlerFailure)?;
            return Ok(Disposition::Bypassed);
        }

        let key = self.extract_key(request)?;
        let fingerprint = Fingerprint::compute(&request.method, &request.resource, &request.body);

        let span = tracing::info_span!(
            "idempotency",
            key = %mask_sensitive(key.as_str(), 4),
            method = %request.method,
            resource = %request.resource,
        );
        self.process(&key, &fingerprint, request, handler, sink)
            .instrument(span)
            .await
    }

    fn extract_key(&self, request: &IdempotentRequest) -> Result<IdempotencyKey> {
        let value = request
            .headers
            .get(self.config.header_name.as_str())
            .ok_or_else(|| AppError::MissingKey(self.config.header_name.clone()))?;

        let raw = value.to_str().map_err(|_| {
            AppError::InvalidKey(
                "idempotency key must contain only visible ASCII characters".to_string(),
            )
        })?;

        IdempotencyKey::parse(raw, self.config.max_key_length)
    }

    async fn process(
        &self,
        key: &IdempotencyKey,
        fingerprint: &Fingerprint,
        request: &IdempotentRequest,
        handler: &dyn Handler,
        sink: &mut dyn ResponseSink,
    ) -> Result<Disposition> {
        if let Some(existing) = self.records.get(key.as_str()).await? {
            return self.resolve_existing(existing, fingerprint, sink);
        }

        let Some(lock) = self.locks.acquire(key.as_str(), self.config.lock_lease).await? else {
            self.stats.record_contended();
            tracing::info!("Duplicate request rejected: lock held by a concurrent request");
            return Err(AppError::LockContended {
                key: key.to_string(),
            });
        };

        let result = self
            .execute_locked(key, fingerprint, request, handler, sink)
            .await;

        if let Err(e) = lock.release().await {
            tracing::warn!("Failed to release idempotency lock: {}", e);
        }
        result
    }

    /// Answers a request whose key already has a record. Pure read of
    /// settled state.
    fn resolve_existing(
        &self,
        existing: IdempotencyRecord,
        fingerprint: &Fingerprint,
        sink: &mut dyn ResponseSink,
    ) -> Result<Disposition> {
        if existing.fingerprint != *fingerprint {
            self.stats.record_mismatch();
            tracing::warn!(
                stored_status = existing.status.as_str(),
                "Idempotency key reused with different request parameters"
            );
            return Err(AppError::FingerprintMismatch { key: existing.key });
        }

        match existing.status {
            IdempotencyStatus::Processing => {
                self.stats.record_in_flight_duplicate();
                tracing::info!("Duplicate request rejected: original still processing");
                Err(AppError::AlreadyProcessing { key: existing.key })
            }
            IdempotencyStatus::Completed => {
                let (Some(status_code), Some(body)) =
                    (existing.response_status_code, existing.response_body)
                else {
                    return Err(AppError::Internal(anyhow!(
                        "Completed idempotency record has no response data"
                    )));
                };

                sink.set_status(status_code);
                if let Some(ref content_type) = existing.content_type {
                    sink.set_header(http::header::CONTENT_TYPE.as_str(), content_type);
                }
                sink.set_header(IDEMPOTENCY_REPLAYED_HEADER, "true");
                sink.write(&body).map_err(|e| {
                    AppError::Internal(anyhow::Error::new(e).context("Failed to write replayed response"))
                })?;

                self.stats.record_replayed();
                tracing::debug!(status_code, "Replayed stored response");
                Ok(Disposition::Replayed { status_code })
            }
        }
    }

    async fn execute_locked(
        &self,
        key: &IdempotencyKey,
        fingerprint: &Fingerprint,
        request: &IdempotentRequest,
        handler: &dyn Handler,
        sink: &mut dyn ResponseSink,
    ) -> Result<Disposition> {
        let record = match self
            .records
            .put_processing(key.as_str(), fingerprint, self.config.record_ttl)
            .await
        {
            Ok(record) => record,
            Err(AppError::AlreadyExists(_)) => {
                // An earlier holder finished between our read and our acquire.
                tracing::debug!("Record appeared after lock acquisition");
                return match self.records.get(key.as_str()).await? {
                    Some(existing) => self.resolve_existing(existing, fingerprint, sink),
                    None => {
                        self.stats.record_in_flight_duplicate();
                        Err(AppError::AlreadyProcessing {
                            key: key.to_string(),
                        })
                    }
                };
            }
            Err(e) => return Err(e),
        };

        let timer = LatencyTimer::new();
        let mut capture = ResponseCapture::new(sink, self.config.max_capture_bytes);
        let outcome = handler.handle(request, &mut capture).await;
        get_metrics().record_handler_latency(timer.elapsed_ms(), outcome.is_ok());

        if let Err(e) = outcome {
            self.stats.record_handler_failure();
            tracing::warn!("Handler failed; record stays PROCESSING until it expires: {:#}", e);
            return Err(AppError::HandlerFailure(e));
        }
        self.stats.record_executed();

        let status_code = capture.status_code();
        let captured = match capture.finish() {
            Ok(captured) => captured,
            Err(e) => {
                self.stats.record_completion_failure();
                tracing::warn!("Response not cached, record stays PROCESSING: {}", e);
                return Ok(Disposition::Executed { status_code });
            }
        };

        if let Err(e) = self.records.complete(key.as_str(), &captured).await {
            self.stats.record_completion_failure();
            tracing::error!("Failed to mark idempotency record as completed: {}", e);
            return Ok(Disposition::Executed { status_code });
        }

        self.notify_sink(key, fingerprint, request, &captured, record.created_at);
        Ok(Disposition::Executed { status_code })
    }

    fn notify_sink(
        &self,
        key: &IdempotencyKey,
        fingerprint: &Fingerprint,
        request: &IdempotentRequest,
        captured: &CapturedResponse,
        created_at: DateTime<Utc>,
    ) {
        let Some(ref dispatcher) = self.sink else {
            return;
        };

        dispatcher.enqueue(CompletedOperation {
            idempotency_key: key.to_string(),
            fingerprint: fingerprint.to_string(),
            operation: request.method.to_string(),
            resource: request.resource.clone(),
            response_status_code: captured.status_code,
            response_size_bytes: captured.body.len(),
            response_body: std::str::from_utf8(&captured.body).ok().map(str::to_string),
            created_at,
            completed_at: Utc::now(),
        });
    }
}
