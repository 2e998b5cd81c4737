//! Error types for the Kafka client library

use std::time::Duration;
use thiserror::Error;

/// Result type for producer and consumer operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type for document store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the producer service and the consumer lifecycle
#[derive(Error, Debug)]
pub enum ClientError {
    /// Broker or store connection could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Message value has no JSON representation
    #[error("Failed to encode message value: {0}")]
    Encode(#[from] serde_json::Error),

    /// Broker rejected the record, timed out, or was unreachable
    #[error("Failed to send message: {0}")]
    Publish(String),

    /// Unrecoverable error reported while consuming
    #[error("Consumer error: {0}")]
    Deliver(String),

    /// Document insert failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Consumer construction failed (store unreachable, subscribe rejected)
    #[error("Setup failed: {0}")]
    Setup(String),

    /// Operation attempted after close or stop
    #[error("{0} is closed")]
    Closed(&'static str),

    /// `start()` invoked on a consumer that already left the created state
    #[error("Consumer already started")]
    AlreadyStarted,

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Errors that end a consumer lifecycle rather than a single operation
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Connect(_) | ClientError::Deliver(_) | ClientError::Setup(_)
        )
    }
}

impl From<rdkafka::error::KafkaError> for ClientError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        ClientError::Connect(err.to_string())
    }
}

/// Document store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Insert failed: {0}")]
    Insert(String),

    #[error("Insert timed out after {0:?}")]
    Timeout(Duration),

    #[error("Document serialization failed: {0}")]
    Serialization(String),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Insert(err.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Configuration loading and validation failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),
}
