//! Kafka client library
//!
//! This crate provides:
//! - A producer service that JSON-encodes values and publishes them with
//!   broker acknowledgement
//! - A consumer lifecycle controller that runs a consumer-group worker,
//!   signals readiness on first assignment and shuts down cleanly
//! - Optional MongoDB persistence of consumed messages, acknowledged only
//!   after the insert succeeded

pub mod codec;
pub mod config;
pub mod error;
pub mod kafka;
pub mod message;
pub mod service;
pub mod store;

pub use config::{ConsumerConfig, EnvConfig, OffsetReset, ProducerConfig, StoreConfig};
pub use error::{ClientError, ClientResult, ConfigError, StoreError, StoreResult};
pub use kafka::{Delivery, GroupConsumer, OutgoingRecord, RecordPublisher, SessionHandler};
pub use message::{ConsumedRecord, Message, OutgoingMessage};
pub use service::{ConsumerService, LifecycleState, ProducerService, ReadyGate};
pub use store::{MessageStore, MongoMessageStore};
