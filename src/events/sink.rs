use crate::error::Result;
use async_trait::async_trait;

use super::types::CompletedOperation;

/// Audit persistence for completed operations.
#[async_trait]
pub trait DurableSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn record(&self, operation: &CompletedOperation) -> Result<()>;
}

/// Sink that writes completed operations to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl DurableSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn record(&self, operation: &CompletedOperation) -> Result<()> {
        tracing::info!(
            target: "idempotency::audit",
            operation = %operation.operation,
            resource = %operation.resource,
            status = operation.response_status_code,
            size_bytes = operation.response_size_bytes,
            fingerprint = %operation.fingerprint,
            "Idempotent operation completed"
        );
        Ok(())
    }
}
