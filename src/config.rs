//! Configuration for the producer, the consumer and the document store
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

/// Producer settings; the policy knobs are handed straight to librdkafka
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Kafka broker addresses (host:port)
    pub brokers: Vec<String>,

    /// Required acknowledgements per record
    pub acks: String,

    /// Bounded publish retries
    pub retries: u32,

    /// Compression codec for record batches
    pub compression: String,

    /// How long records may sit in the local queue before a flush
    pub linger_ms: u64,

    /// librdkafka-side delivery timeout
    pub message_timeout_ms: u64,

    /// How long `send` waits for the delivery report
    pub delivery_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            acks: "all".to_string(),
            retries: 3,
            compression: "snappy".to_string(),
            linger_ms: 500,
            message_timeout_ms: 30_000,
            delivery_timeout: Duration::from_secs(30),
        }
    }
}

impl ProducerConfig {
    pub fn new(brokers: Vec<String>) -> Self {
        Self {
            brokers,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_brokers(&self.brokers)
    }
}

/// Where a consumer group without committed offsets starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    Earliest,
    #[default]
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MongoDB persistence settings; present only when persistence is enabled
#[derive(Clone)]
pub struct StoreConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
    pub connect_timeout: Duration,
    pub insert_timeout: Duration,
}

impl StoreConfig {
    pub fn new(
        uri: impl Into<String>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            collection: collection.into(),
            connect_timeout: Duration::from_secs(10),
            insert_timeout: Duration::from_secs(5),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.uri.trim().is_empty() {
            return Err(ConfigError::Missing("MONGO_URI"));
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "MONGO_DB",
                reason: "database name is empty".to_string(),
            });
        }
        if self.collection.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "MONGO_COLLECTION",
                reason: "collection name is empty".to_string(),
            });
        }
        Ok(())
    }
}

// The URI may carry credentials
impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("uri", &redact_uri(&self.uri))
            .field("database", &self.database)
            .field("collection", &self.collection)
            .field("connect_timeout", &self.connect_timeout)
            .field("insert_timeout", &self.insert_timeout)
            .finish()
    }
}

/// Consumer-group settings
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub brokers: Vec<String>,
    pub topics: Vec<String>,
    pub group_id: String,
    pub session_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub offset_reset: OffsetReset,
    pub assignment_strategy: String,
    pub auto_commit_interval: Duration,
    pub store: Option<StoreConfig>,
}

impl ConsumerConfig {
    pub fn new(brokers: Vec<String>, topics: Vec<String>, group_id: impl Into<String>) -> Self {
        Self {
            brokers,
            topics,
            group_id: group_id.into(),
            session_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(3),
            offset_reset: OffsetReset::Latest,
            assignment_strategy: "roundrobin".to_string(),
            auto_commit_interval: Duration::from_secs(1),
            store: None,
        }
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = Some(store);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_brokers(&self.brokers)?;
        if self.topics.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigError::Missing("KAFKA_TOPICS"));
        }
        if self.group_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "CONSUMER_GROUP",
                reason: "group id is empty".to_string(),
            });
        }
        if self.heartbeat_interval >= self.session_timeout {
            return Err(ConfigError::Invalid {
                field: "heartbeat_interval",
                reason: "must be lower than the session timeout".to_string(),
            });
        }
        if let Some(store) = &self.store {
            store.validate()?;
        }
        Ok(())
    }
}

/// Broker settings read from the environment
///
/// Consumer group and MongoDB settings come in through the CLI flags, which
/// read `CONSUMER_GROUP` and `MONGO_*` themselves.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvConfig {
    /// Comma-separated Kafka broker addresses
    #[serde(default)]
    pub kafka_brokers: Vec<String>,

    /// Comma-separated topic list
    #[serde(default)]
    pub kafka_topics: Vec<String>,

    #[serde(default)]
    pub kafka_offset_reset: OffsetReset,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(envy::from_env()?)
    }

    pub fn brokers(&self) -> Vec<String> {
        clean_list(&self.kafka_brokers)
    }

    pub fn topics(&self) -> Vec<String> {
        clean_list(&self.kafka_topics)
    }
}

/// Trim entries and drop the empty ones left by stray commas
pub fn clean_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn validate_brokers(brokers: &[String]) -> Result<(), ConfigError> {
    if brokers.is_empty() {
        return Err(ConfigError::Missing("KAFKA_BROKERS"));
    }
    for broker in brokers {
        let valid = broker
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !valid {
            return Err(ConfigError::Invalid {
                field: "KAFKA_BROKERS",
                reason: format!("'{broker}' is not a host:port address"),
            });
        }
    }
    Ok(())
}

fn redact_uri(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &uri[..scheme_end], &uri[at..])
        }
        _ => uri.to_string(),
    }
}
