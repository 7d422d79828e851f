use crate::error::{AppError, Result};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use rskafka::client::partition::{Compression, PartitionClient, UnknownTopicHandling};
use rskafka::client::ClientBuilder;
use rskafka::record::Record;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::sink::DurableSink;
use super::types::{topics, CompletedOperation};

/// Configuration for the Kafka producer.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub compression: CompressionType,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl From<CompressionType> for Compression {
    fn from(ct: CompressionType) -> Self {
        match ct {
            CompressionType::None => Compression::NoCompression,
            CompressionType::Gzip => Compression::Gzip,
            CompressionType::Snappy => Compression::Snappy,
            CompressionType::Lz4 => Compression::Lz4,
            CompressionType::Zstd => Compression::Zstd,
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: topics::COMPLETED.to_string(),
            compression: CompressionType::default(),
            retry_count: 3,
            retry_delay_ms: 100,
        }
    }
}

impl ProducerConfig {
    /// Parses a comma-separated broker list.
    pub fn with_brokers(mut self, brokers: &str) -> Self {
        self.brokers = brokers
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect();
        self
    }
}

/// Kafka event producer bound to a single topic.
pub struct EventProducer {
    config: ProducerConfig,
    partition_client: RwLock<Option<Arc<PartitionClient>>>,
    client: Option<Arc<rskafka::client::Client>>,
}

impl EventProducer {
    pub fn new(config: ProducerConfig) -> Self {
        Self {
            config,
            partition_client: RwLock::new(None),
            client: None,
        }
    }

    /// Connects to the Kafka cluster.
    pub async fn connect(&mut self) -> Result<()> {
        info!("Connecting to Kafka brokers: {:?}", self.config.brokers);

        let client = ClientBuilder::new(self.config.brokers.clone())
            .build()
            .await
            .map_err(AppError::Kafka)?;

        self.client = Some(Arc::new(client));
        info!("Successfully connected to Kafka");
        Ok(())
    }

    async fn get_partition_client(&self) -> Result<Arc<PartitionClient>> {
        if let Some(client) = self.partition_client.read().await.as_ref() {
            return Ok(client.clone());
        }

        let kafka_client = self
            .client
            .as_ref()
            .ok_or_else(|| AppError::Internal(anyhow!("Kafka client not connected")))?;

        let partition_client = kafka_client
            .partition_client(self.config.topic.clone(), 0, UnknownTopicHandling::Retry)
            .await
            .map_err(AppError::Kafka)?;
        let client = Arc::new(partition_client);

        *self.partition_client.write().await = Some(client.clone());
        Ok(client)
    }

    /// Sends a raw message, retrying with linear backoff.
    pub async fn send_raw(&self, key: Option<&str>, payload: Vec<u8>) -> Result<i64> {
        let partition_client = self.get_partition_client().await?;

        let record = Record {
            key: key.map(|k| k.as_bytes().to_vec()),
            value: Some(payload),
            headers: BTreeMap::new(),
            timestamp: Utc::now(),
        };

        let mut last_error = None;
        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                warn!("Retrying Kafka send, attempt {}/{}", attempt, self.config.retry_count);
                tokio::time::sleep(Duration::from_millis(
                    self.config.retry_delay_ms * attempt as u64,
                ))
                .await;
            }

            match partition_client
                .produce(vec![record.clone()], self.config.compression.into())
                .await
            {
                Ok(offsets) => {
                    let offset = offsets.first().copied().unwrap_or(0);
                    debug!("Message sent to topic {} at offset {}", self.config.topic, offset);
                    return Ok(offset);
                }
                Err(e) => {
                    warn!("Failed to send message to Kafka: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(AppError::Internal(anyhow!(
            "Failed to send message after {} retries: {:?}",
            self.config.retry_count,
            last_error
        )))
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }
}

/// Durable sink publishing completed operations to Kafka.
pub struct KafkaSink {
    producer: EventProducer,
}

impl KafkaSink {
    pub async fn connect(config: ProducerConfig) -> Result<Self> {
        let mut producer = EventProducer::new(config);
        producer.connect().await?;
        Ok(Self { producer })
    }

    pub fn is_connected(&self) -> bool {
        self.producer.is_connected()
    }
}

#[async_trait]
impl DurableSink for KafkaSink {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn record(&self, operation: &CompletedOperation) -> Result<()> {
        let envelope = operation.clone().into_envelope();
        let payload = serde_json::to_vec(&envelope)
            .map_err(|e| AppError::Internal(anyhow!("Failed to serialize event: {}", e)))?;

        self.producer
            .send_raw(Some(&operation.idempotency_key), payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_config_default() {
        let config = ProducerConfig::default();
        assert_eq!(config.brokers, vec!["localhost:9092".to_string()]);
        assert_eq!(config.topic, topics::COMPLETED);
        assert_eq!(config.retry_count, 3);
    }

    #[test]
    fn test_broker_list_parsing() {
        let config = ProducerConfig::default().with_brokers("kafka-1:9092, kafka-2:9092,,");
        assert_eq!(
            config.brokers,
            vec!["kafka-1:9092".to_string(), "kafka-2:9092".to_string()]
        );
    }

    #[test]
    fn test_compression_conversion() {
        assert!(matches!(Compression::from(CompressionType::None), Compression::NoCompression));
        assert!(matches!(Compression::from(CompressionType::Gzip), Compression::Gzip));
        assert!(matches!(Compression::from(CompressionType::Zstd), Compression::Zstd));
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let producer = EventProducer::new(ProducerConfig::default());
        assert!(!producer.is_connected());

        let err = producer.send_raw(Some("k"), b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }
}
