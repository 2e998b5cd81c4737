//! Message shapes for the produce and consume paths

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::codec;

/// Message handed to the producer service
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage<V> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    pub value: V,

    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl<V> OutgoingMessage<V> {
    pub fn new(value: V) -> Self {
        Self {
            key: None,
            value,
            headers: HashMap::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Raw record as delivered by a consumer-group session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<(String, Vec<u8>)>,
    /// Milliseconds since the Unix epoch, when the broker reported one
    pub timestamp_ms: Option<i64>,
}

/// Consumed message, as logged and persisted downstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    pub value: Value,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Build a message from broker metadata, decoding the payload
    pub fn from_record(record: &ConsumedRecord) -> Self {
        let payload = record.payload.as_deref().unwrap_or_default();

        let key = record
            .key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(|key| String::from_utf8_lossy(key).into_owned());

        let headers = record
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), String::from_utf8_lossy(value).into_owned()))
            .collect();

        let timestamp = record
            .timestamp_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_default();

        Self {
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            key,
            value: codec::decode(payload),
            headers,
            timestamp,
        }
    }
}
