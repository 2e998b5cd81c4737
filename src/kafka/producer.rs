//! Kafka record publisher
//!
//! Thin seam over rdkafka's `FutureProducer`: every publish waits for the
//! delivery report, so a successful return means the broker acknowledged the
//! record under the configured `acks` policy.

use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{error, info};

use crate::config::ProducerConfig;
use crate::error::{ClientError, ClientResult};

/// Record ready to be published, value already encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRecord {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

/// Where the broker placed an acknowledged record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Publish side of the broker client
#[async_trait]
pub trait RecordPublisher: Send + Sync {
    /// Publish one record and wait for the broker acknowledgement
    async fn publish(&self, record: OutgoingRecord) -> ClientResult<Delivery>;

    /// Flush queued records and release the handle
    async fn close(&self) -> ClientResult<()>;
}

/// Build the librdkafka producer configuration
pub fn producer_client_config(config: &ProducerConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", config.brokers.join(","))
        .set("acks", &config.acks)
        .set("retries", config.retries.to_string())
        .set("compression.type", &config.compression)
        .set("linger.ms", config.linger_ms.to_string())
        .set("message.timeout.ms", config.message_timeout_ms.to_string());
    client_config
}

/// rdkafka-backed publisher
pub struct KafkaRecordPublisher {
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaRecordPublisher {
    /// Create a new publisher
    ///
    /// librdkafka connects lazily, so an unreachable broker surfaces on the
    /// first publish rather than here.
    pub fn new(config: &ProducerConfig) -> ClientResult<Self> {
        config.validate()?;

        let producer: FutureProducer = producer_client_config(config)
            .create()
            .map_err(|e| ClientError::Connect(format!("failed to create producer: {e}")))?;

        info!(
            brokers = %config.brokers.join(","),
            acks = %config.acks,
            compression = %config.compression,
            "Kafka producer initialized"
        );

        Ok(Self {
            producer,
            delivery_timeout: config.delivery_timeout,
        })
    }
}

#[async_trait]
impl RecordPublisher for KafkaRecordPublisher {
    async fn publish(&self, record: OutgoingRecord) -> ClientResult<Delivery> {
        let mut headers = OwnedHeaders::new_with_capacity(record.headers.len());
        for (key, value) in &record.headers {
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_bytes()),
            });
        }

        let base = FutureRecord::to(&record.topic)
            .payload(record.payload.as_slice())
            .headers(headers);

        let result = match record.key.as_deref() {
            Some(key) => self.producer.send(base.key(key), self.delivery_timeout).await,
            None => self.producer.send(base, self.delivery_timeout).await,
        };

        match result {
            Ok((partition, offset)) => Ok(Delivery { partition, offset }),
            Err((err, _)) => {
                error!(topic = %record.topic, error = %err, "Kafka publish failed");
                Err(ClientError::Publish(err.to_string()))
            }
        }
    }

    async fn close(&self) -> ClientResult<()> {
        let producer = self.producer.clone();
        let timeout = self.delivery_timeout;

        // flush blocks the calling thread until the queue drains
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| ClientError::Publish(format!("flush task failed: {e}")))?
            .map_err(|e| ClientError::Publish(format!("flush failed: {e}")))?;

        info!("Kafka producer flushed");
        Ok(())
    }
}

/// Fetch the topic names known to the cluster
pub async fn fetch_topics(brokers: &[String], timeout: Duration) -> ClientResult<Vec<String>> {
    let consumer: BaseConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers.join(","))
        .create()
        .map_err(|e| ClientError::Connect(e.to_string()))?;

    tokio::task::spawn_blocking(move || -> ClientResult<Vec<String>> {
        let metadata = consumer
            .fetch_metadata(None, timeout)
            .map_err(|e| ClientError::Connect(format!("failed to fetch metadata: {e}")))?;

        Ok(metadata
            .topics()
            .iter()
            .map(|topic| topic.name().to_string())
            .collect())
    })
    .await
    .map_err(|e| ClientError::Connect(format!("metadata task failed: {e}")))?
}
