pub mod capture;
pub mod engine;
pub mod fingerprint;
pub mod record;
pub mod stats;

pub use capture::{BufferedResponse, CaptureError, CapturedResponse, ResponseCapture, ResponseSink};
pub use engine::{
    Disposition, EngineConfig, Handler, IdempotencyEngine, IdempotentRequest,
    IDEMPOTENCY_KEY_HEADER, IDEMPOTENCY_REPLAYED_HEADER,
};
pub use fingerprint::{Fingerprint, IdempotencyKey};
pub use record::{IdempotencyRecord, IdempotencyStatus};
pub use stats::{EngineStats, StatsSnapshot};
