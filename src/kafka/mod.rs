//! Kafka integration
//!
//! - Producer: acknowledged publishes through `RecordPublisher`
//! - Consumer: consumer-group sessions through `GroupConsumer`
//! - Context: rebalance tracking and librdkafka log forwarding

pub mod context;
pub mod consumer;
pub mod producer;

pub use consumer::{consumer_client_config, GroupConsumer, KafkaGroupConsumer, SessionHandler};
pub use context::SessionContext;
pub use producer::{
    fetch_topics, producer_client_config, Delivery, KafkaRecordPublisher, OutgoingRecord,
    RecordPublisher,
};
