//! Shared fixtures: scripted broker fakes for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

use ran_kafka_client::{
    ClientError, ClientResult, ConsumedRecord, ConsumerConfig, Delivery, GroupConsumer,
    OutgoingRecord, RecordPublisher, SessionHandler,
};

pub fn consumer_config() -> ConsumerConfig {
    ConsumerConfig::new(
        vec!["localhost:9092".to_string()],
        vec!["orders".to_string()],
        "test-group",
    )
}

pub fn record(topic: &str, partition: i32, offset: i64, payload: &[u8]) -> ConsumedRecord {
    ConsumedRecord {
        topic: topic.to_string(),
        partition,
        offset,
        key: None,
        payload: Some(payload.to_vec()),
        headers: Vec::new(),
        timestamp_ms: Some(1_700_000_000_000),
    }
}

/// Poll `condition` until it holds or the deadline passes
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Consumer-group fake driven by a script of sessions
///
/// Each `deliver` call pops one session: partitions are assigned, the
/// session's records are handed over in order and the call returns as if the
/// partitions were revoked. Once the script is exhausted `deliver` either
/// fails with the configured fatal error or parks until shutdown.
#[derive(Default)]
pub struct FakeGroupConsumer {
    sessions: Mutex<VecDeque<Vec<ConsumedRecord>>>,
    fatal: Mutex<Option<String>>,
    acks: Mutex<Vec<(String, i32, i64)>>,
    delivering: AtomicBool,
    close_calls: AtomicUsize,
    closed_while_delivering: AtomicBool,
}

impl FakeGroupConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(self, records: Vec<ConsumedRecord>) -> Self {
        self.sessions.lock().unwrap().push_back(records);
        self
    }

    pub fn with_fatal_error(self, message: &str) -> Self {
        *self.fatal.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn acks(&self) -> Vec<(String, i32, i64)> {
        self.acks.lock().unwrap().clone()
    }

    pub fn ack_count(&self) -> usize {
        self.acks.lock().unwrap().len()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn closed_while_delivering(&self) -> bool {
        self.closed_while_delivering.load(Ordering::SeqCst)
    }

    async fn run_session(
        &self,
        handler: &dyn SessionHandler,
        mut shutdown: watch::Receiver<bool>,
    ) -> ClientResult<()> {
        let session = self.sessions.lock().unwrap().pop_front();
        if let Some(records) = session {
            handler.setup();
            for record in &records {
                handler.consume(record).await;
            }
            return Ok(());
        }

        let fatal = self.fatal.lock().unwrap().take();
        if let Some(message) = fatal {
            return Err(ClientError::Deliver(message));
        }

        let _ = shutdown.wait_for(|stop| *stop).await;
        Ok(())
    }
}

#[async_trait]
impl GroupConsumer for FakeGroupConsumer {
    async fn deliver(
        &self,
        handler: &dyn SessionHandler,
        shutdown: watch::Receiver<bool>,
    ) -> ClientResult<()> {
        self.delivering.store(true, Ordering::SeqCst);
        let result = self.run_session(handler, shutdown).await;
        self.delivering.store(false, Ordering::SeqCst);
        result
    }

    fn acknowledge(&self, record: &ConsumedRecord) -> ClientResult<()> {
        self.acks
            .lock()
            .unwrap()
            .push((record.topic.clone(), record.partition, record.offset));
        Ok(())
    }

    fn close(&self) -> ClientResult<()> {
        if self.delivering.load(Ordering::SeqCst) {
            self.closed_while_delivering.store(true, Ordering::SeqCst);
        }
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Publisher fake that captures every record it is handed
#[derive(Default)]
pub struct RecordingPublisher {
    records: Mutex<Vec<OutgoingRecord>>,
    fail_with: Option<String>,
    close_calls: AtomicUsize,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<OutgoingRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordPublisher for RecordingPublisher {
    async fn publish(&self, record: OutgoingRecord) -> ClientResult<Delivery> {
        if let Some(message) = &self.fail_with {
            return Err(ClientError::Publish(message.clone()));
        }

        let mut records = self.records.lock().unwrap();
        records.push(record);
        Ok(Delivery {
            partition: 0,
            offset: records.len() as i64 - 1,
        })
    }

    async fn close(&self) -> ClientResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
