pub mod dispatcher;
pub mod producer;
pub mod sink;
pub mod types;

pub use dispatcher::{SinkDispatcher, SinkWorker};
pub use producer::{EventProducer, KafkaSink, ProducerConfig};
pub use sink::{DurableSink, LogSink};
pub use types::{CompletedOperation, EventEnvelope, EventType};
