//! Producer service
//!
//! Encodes message values with the JSON codec and publishes them through a
//! `RecordPublisher`. Each send waits for the broker acknowledgement and
//! reports where the record landed.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::codec;
use crate::config::ProducerConfig;
use crate::error::{ClientError, ClientResult};
use crate::kafka::{Delivery, KafkaRecordPublisher, OutgoingRecord, RecordPublisher};
use crate::message::OutgoingMessage;

pub struct ProducerService {
    publisher: Arc<dyn RecordPublisher>,
    closed: AtomicBool,
}

impl ProducerService {
    /// Create a producer backed by Kafka
    pub fn new(config: &ProducerConfig) -> ClientResult<Self> {
        let publisher = KafkaRecordPublisher::new(config)?;
        Ok(Self::with_publisher(Arc::new(publisher)))
    }

    pub fn with_publisher(publisher: Arc<dyn RecordPublisher>) -> Self {
        Self {
            publisher,
            closed: AtomicBool::new(false),
        }
    }

    /// Encode `message.value` as JSON and publish it
    pub async fn send<V>(&self, topic: &str, message: &OutgoingMessage<V>) -> ClientResult<Delivery>
    where
        V: Serialize,
    {
        self.ensure_open()?;

        let payload = codec::encode(&message.value)?;
        let delivery = self
            .publish(topic, message.key.clone(), payload.clone(), &message.headers)
            .await?;

        info!(
            topic = %topic,
            partition = delivery.partition,
            offset = delivery.offset,
            payload = %String::from_utf8_lossy(&payload),
            "Message sent"
        );
        Ok(delivery)
    }

    /// Publish caller-encoded bytes as-is
    pub async fn send_raw(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &[u8],
        headers: &HashMap<String, String>,
    ) -> ClientResult<Delivery> {
        self.ensure_open()?;

        let delivery = self
            .publish(topic, key.map(str::to_string), value.to_vec(), headers)
            .await?;

        info!(
            topic = %topic,
            partition = delivery.partition,
            offset = delivery.offset,
            payload = %String::from_utf8_lossy(value),
            "Raw message sent"
        );
        Ok(delivery)
    }

    /// Flush and release the publisher; later calls fail with `Closed`
    pub async fn close(&self) -> ClientResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ClientError::Closed("producer"));
        }

        if let Err(e) = self.publisher.close().await {
            warn!(error = %e, "Error closing producer");
            return Err(e);
        }
        info!("Producer closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn publish(
        &self,
        topic: &str,
        key: Option<String>,
        payload: Vec<u8>,
        headers: &HashMap<String, String>,
    ) -> ClientResult<Delivery> {
        let record = OutgoingRecord {
            topic: topic.to_string(),
            key,
            payload,
            headers: headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        self.publisher.publish(record).await
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.is_closed() {
            return Err(ClientError::Closed("producer"));
        }
        Ok(())
    }
}
