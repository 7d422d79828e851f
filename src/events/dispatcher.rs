use crate::observability::get_metrics;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::sink::DurableSink;
use super::types::CompletedOperation;

/// Non-blocking front of a [`DurableSink`]. Enqueue never waits; a full or
/// closed queue drops the notification and logs it.
#[derive(Clone)]
pub struct SinkDispatcher {
    sender: mpsc::Sender<CompletedOperation>,
}

/// Background task draining the dispatcher queue into the sink.
pub struct SinkWorker {
    handle: JoinHandle<()>,
}

impl SinkDispatcher {
    /// Spawns the worker and returns the enqueue handle.
    pub fn start(sink: Arc<dyn DurableSink>, capacity: usize) -> (Self, SinkWorker) {
        let (sender, mut receiver) = mpsc::channel::<CompletedOperation>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(operation) = receiver.recv().await {
                match sink.record(&operation).await {
                    Ok(()) => {
                        get_metrics().record_sink_event("recorded");
                        debug!(sink = sink.name(), "Completed operation recorded");
                    }
                    Err(e) => {
                        get_metrics().record_sink_event("failed");
                        error!(
                            sink = sink.name(),
                            "Failed to record completed operation: {}", e
                        );
                    }
                }
            }
            debug!(sink = sink.name(), "Sink worker stopped");
        });

        (Self { sender }, SinkWorker { handle })
    }

    /// Hands the operation to the worker without waiting. Returns whether
    /// it was queued.
    pub fn enqueue(&self, operation: CompletedOperation) -> bool {
        match self.sender.try_send(operation) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                get_metrics().record_sink_event("dropped");
                warn!("Durable sink queue is full; completed operation not recorded");
                false
            }
            Err(TrySendError::Closed(_)) => {
                get_metrics().record_sink_event("dropped");
                error!("Durable sink worker has stopped; completed operation not recorded");
                false
            }
        }
    }
}

impl SinkWorker {
    /// Waits for the queue to drain. Completes once every dispatcher clone
    /// has been dropped.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!("Sink worker terminated abnormally: {}", e);
        }
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}
