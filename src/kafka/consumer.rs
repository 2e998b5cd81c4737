//! Kafka consumer-group client
//!
//! `GroupConsumer` is the subscribe side of the broker client: one call to
//! `deliver` runs one group session, handing records to a `SessionHandler`
//! in partition order. Offsets are only stored when the handler acknowledges
//! a record; librdkafka's auto-commit then commits whatever was stored.

use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Headers, Message as _};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::context::SessionContext;
use crate::config::ConsumerConfig;
use crate::error::{ClientError, ClientResult};
use crate::message::ConsumedRecord;

/// Receives session events from a `GroupConsumer`
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Partitions were assigned and records are about to flow
    fn setup(&self);

    /// Handle one record; the next record of the same partition is not
    /// delivered until this returns
    async fn consume(&self, record: &ConsumedRecord);
}

/// Subscribe side of the broker client
#[async_trait]
pub trait GroupConsumer: Send + Sync {
    /// Run one group session until it is revoked, `shutdown` flips to true,
    /// or the broker reports an unrecoverable error
    ///
    /// Broker outages such as `AllBrokersDown` are not unrecoverable:
    /// librdkafka keeps reconnecting on its own, so they are logged and the
    /// session goes on. Only a fatal client error or the end of the message
    /// stream returns `Err`, which means `ConsumerService::start` keeps
    /// running through an outage of any length.
    async fn deliver(
        &self,
        handler: &dyn SessionHandler,
        shutdown: watch::Receiver<bool>,
    ) -> ClientResult<()>;

    /// Mark a handled record so its offset is committed
    fn acknowledge(&self, record: &ConsumedRecord) -> ClientResult<()>;

    /// Leave the group and release the handle
    fn close(&self) -> ClientResult<()>;
}

/// Build the librdkafka consumer configuration
pub fn consumer_client_config(config: &ConsumerConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", config.brokers.join(","))
        .set("group.id", &config.group_id)
        .set("partition.assignment.strategy", &config.assignment_strategy)
        .set("auto.offset.reset", config.offset_reset.as_str())
        .set("session.timeout.ms", config.session_timeout.as_millis().to_string())
        .set("heartbeat.interval.ms", config.heartbeat_interval.as_millis().to_string())
        .set("enable.auto.commit", "true")
        .set("auto.commit.interval.ms", config.auto_commit_interval.as_millis().to_string())
        // offsets are stored explicitly on acknowledge
        .set("enable.auto.offset.store", "false")
        .set("enable.partition.eof", "false");
    client_config
}

/// rdkafka-backed consumer-group client
pub struct KafkaGroupConsumer {
    consumer: StreamConsumer<SessionContext>,
    closed: AtomicBool,
}

impl KafkaGroupConsumer {
    /// Create the consumer and subscribe to the configured topics
    pub fn new(config: &ConsumerConfig) -> ClientResult<Self> {
        config.validate()?;

        let consumer: StreamConsumer<SessionContext> = consumer_client_config(config)
            .create_with_context(SessionContext::new())
            .map_err(|e| ClientError::Connect(format!("failed to create consumer group: {e}")))?;

        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|e| ClientError::Setup(format!("failed to subscribe: {e}")))?;

        info!(
            brokers = %config.brokers.join(","),
            topics = ?config.topics,
            group_id = %config.group_id,
            offset_reset = %config.offset_reset,
            "Kafka consumer initialized"
        );

        Ok(Self {
            consumer,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed("consumer group"));
        }
        Ok(())
    }
}

#[async_trait]
impl GroupConsumer for KafkaGroupConsumer {
    async fn deliver(
        &self,
        handler: &dyn SessionHandler,
        mut shutdown: watch::Receiver<bool>,
    ) -> ClientResult<()> {
        self.ensure_open()?;

        let mut assignments = self.consumer.context().assignments();
        let mut revocations = self.consumer.context().revocations();
        let mut message_stream = self.consumer.stream();

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }

                changed = assignments.changed() => {
                    if changed.is_ok() {
                        handler.setup();
                    }
                }

                changed = revocations.changed() => {
                    if changed.is_ok() {
                        debug!("Consumer group session ended by rebalance");
                        return Ok(());
                    }
                }

                message = message_stream.next() => match message {
                    Some(Ok(msg)) => {
                        let record = record_from_message(&msg);
                        handler.consume(&record).await;
                    }
                    Some(Err(e)) if is_fatal(&e) => {
                        error!(error = %e, "Fatal Kafka consumer error");
                        return Err(ClientError::Deliver(e.to_string()));
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Kafka consumer error");
                    }
                    None => {
                        return Err(ClientError::Deliver("message stream ended".to_string()));
                    }
                },
            }
        }
    }

    fn acknowledge(&self, record: &ConsumedRecord) -> ClientResult<()> {
        self.ensure_open()?;

        // the committed offset is the next one to read
        self.consumer
            .store_offset(&record.topic, record.partition, record.offset + 1)
            .map_err(|e| ClientError::Deliver(format!("failed to store offset: {e}")))
    }

    fn close(&self) -> ClientResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.consumer.unsubscribe();
        info!("Kafka consumer unsubscribed");
        Ok(())
    }
}

fn is_fatal(err: &KafkaError) -> bool {
    matches!(err.rdkafka_error_code(), Some(RDKafkaErrorCode::Fatal))
}

fn record_from_message(msg: &BorrowedMessage<'_>) -> ConsumedRecord {
    let headers = msg
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| {
                    (
                        header.key.to_string(),
                        header.value.map(<[u8]>::to_vec).unwrap_or_default(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    ConsumedRecord {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(<[u8]>::to_vec),
        payload: msg.payload().map(<[u8]>::to_vec),
        headers,
        timestamp_ms: msg.timestamp().to_millis(),
    }
}
