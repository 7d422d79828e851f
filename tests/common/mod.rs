#![allow(dead_code)]

use async_trait::async_trait;
use idempotency_engine::error::{AppError, Result};
use idempotency_engine::events::{CompletedOperation, DurableSink};
use idempotency_engine::idempotency::{
    EngineConfig, Handler, IdempotencyEngine, IdempotentRequest, ResponseSink,
};
use idempotency_engine::store::{CacheStore, InMemoryCacheStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const LEASE: Duration = Duration::from_secs(5);
pub const TTL: Duration = Duration::from_secs(60);

pub fn test_config() -> EngineConfig {
    EngineConfig {
        lock_lease: LEASE,
        record_ttl: TTL,
        ..EngineConfig::default()
    }
}

pub fn setup_engine() -> (IdempotencyEngine, InMemoryCacheStore) {
    let store = InMemoryCacheStore::new();
    let engine = IdempotencyEngine::new(Arc::new(store.clone()), test_config())
        .expect("valid engine config");
    (engine, store)
}

pub fn engine_over(cache: Arc<dyn CacheStore>) -> IdempotencyEngine {
    IdempotencyEngine::new(cache, test_config()).expect("valid engine config")
}

pub fn post(key: &str, body: &str) -> IdempotentRequest {
    IdempotentRequest::new(http::Method::POST, "/payments")
        .with_idempotency_key(key)
        .expect("header-safe idempotency key")
        .with_body(body.to_string())
}

/// Handler that counts invocations and answers with a fixed response.
pub struct CountingHandler {
    calls: AtomicUsize,
    status: u16,
    body: Vec<u8>,
    delay: Option<Duration>,
    fail: bool,
}

impl CountingHandler {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            status,
            body: body.as_bytes().to_vec(),
            delay: None,
            fail: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing() -> Self {
        let mut handler = Self::new(500, "");
        handler.fail = true;
        handler
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for CountingHandler {
    async fn handle(
        &self,
        _request: &IdempotentRequest,
        sink: &mut dyn ResponseSink,
    ) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            anyhow::bail!("downstream ledger rejected the write");
        }

        sink.set_status(self.status);
        sink.set_header("content-type", "application/json");
        sink.write(&self.body)?;
        Ok(())
    }
}

/// Durable sink that keeps every operation it receives.
#[derive(Default)]
pub struct RecordingSink {
    operations: Mutex<Vec<CompletedOperation>>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            operations: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn operations(&self) -> Vec<CompletedOperation> {
        self.operations.lock().await.clone()
    }
}

#[async_trait]
impl DurableSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn record(&self, operation: &CompletedOperation) -> Result<()> {
        self.operations.lock().await.push(operation.clone());
        if self.fail {
            return Err(AppError::Internal(anyhow::anyhow!("audit store offline")));
        }
        Ok(())
    }
}

/// Waits for a background task to make progress.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
