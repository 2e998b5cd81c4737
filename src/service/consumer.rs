//! Consumer lifecycle controller
//!
//! Drives one consumption worker over a `GroupConsumer`:
//!
//! ```text
//! Created -> Starting -> Ready -> Consuming -> Stopping -> Stopped
//! ```
//!
//! `start` spawns the worker, waits for the first partition assignment, then
//! blocks until the termination future resolves, `stop` is called elsewhere,
//! or the worker hits a fatal broker error. `stop` cancels the worker, waits
//! for it to exit and only then releases the broker and store handles.
//!
//! A record is acknowledged only after it was handled, including the store
//! insert when a store is configured. A failed insert leaves the record
//! unacknowledged so it is redelivered after a restart.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ready::ReadyGate;
use crate::config::ConsumerConfig;
use crate::error::{ClientError, ClientResult, StoreError, StoreResult};
use crate::kafka::{GroupConsumer, KafkaGroupConsumer, SessionHandler};
use crate::message::{ConsumedRecord, Message};
use crate::store::{MessageStore, MongoMessageStore};

/// Default bound on a single document insert
pub const STORE_INSERT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Starting,
    Ready,
    Consuming,
    Stopping,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Starting => "starting",
            LifecycleState::Ready => "ready",
            LifecycleState::Consuming => "consuming",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Per-record handler shared with the worker
struct RecordProcessor {
    broker: Arc<dyn GroupConsumer>,
    store: Option<Arc<dyn MessageStore>>,
    insert_timeout: Duration,
    ready: ReadyGate,
}

impl RecordProcessor {
    async fn persist(&self, message: &Message) -> StoreResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        tokio::time::timeout(self.insert_timeout, store.insert(message))
            .await
            .map_err(|_| StoreError::Timeout(self.insert_timeout))?
    }
}

#[async_trait]
impl SessionHandler for RecordProcessor {
    fn setup(&self) {
        if self.ready.fire() {
            info!("Consumer group session established");
        } else {
            debug!("Consumer group session re-established after rebalance");
        }
    }

    async fn consume(&self, record: &ConsumedRecord) {
        let message = Message::from_record(record);

        info!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            value = %message.value,
            "Consumed message"
        );

        if let Err(e) = self.persist(&message).await {
            warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "Failed to store message, leaving offset unacknowledged"
            );
            return;
        }

        if let Err(e) = self.broker.acknowledge(record) {
            warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "Failed to acknowledge message"
            );
        }
    }
}

pub struct ConsumerService {
    config: ConsumerConfig,
    broker: Arc<dyn GroupConsumer>,
    processor: Arc<RecordProcessor>,
    shutdown_tx: watch::Sender<bool>,
    state_tx: watch::Sender<LifecycleState>,
    // Held for the whole start/stop sequence so the two never interleave
    worker: Mutex<Option<JoinHandle<ClientResult<()>>>>,
    outcome: StdMutex<Option<ClientError>>,
}

impl ConsumerService {
    /// Subscribe to Kafka and, when configured, connect MongoDB
    ///
    /// An unreachable store fails construction with `ClientError::Setup`.
    pub async fn connect(config: ConsumerConfig) -> ClientResult<Self> {
        // validates the whole config, store settings included
        let broker = KafkaGroupConsumer::new(&config)?;

        let store: Option<Arc<dyn MessageStore>> = match &config.store {
            Some(store_config) => {
                let store = MongoMessageStore::connect(store_config).await.map_err(|e| {
                    // the subscription is released with `broker`
                    ClientError::Setup(format!("failed to setup MongoDB: {e}"))
                })?;
                Some(Arc::new(store) as Arc<dyn MessageStore>)
            }
            None => None,
        };

        Ok(Self::with_parts(config, Arc::new(broker), store))
    }

    /// Assemble a controller from already-connected capabilities
    pub fn with_parts(
        config: ConsumerConfig,
        broker: Arc<dyn GroupConsumer>,
        store: Option<Arc<dyn MessageStore>>,
    ) -> Self {
        let insert_timeout = config
            .store
            .as_ref()
            .map(|store| store.insert_timeout)
            .unwrap_or(STORE_INSERT_TIMEOUT);

        let processor = Arc::new(RecordProcessor {
            broker: broker.clone(),
            store,
            insert_timeout,
            ready: ReadyGate::new(),
        });

        Self {
            config,
            broker,
            processor,
            shutdown_tx: watch::channel(false).0,
            state_tx: watch::channel(LifecycleState::Created).0,
            worker: Mutex::new(None),
            outcome: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.processor.ready.is_ready()
    }

    /// Run the consumer until `termination` resolves, `stop` is called, or
    /// the broker fails; the lifecycle is fully stopped when this returns
    pub async fn start<F>(&self, termination: F) -> ClientResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.spawn_worker().await?;

        tokio::pin!(termination);
        let mut shutdown = self.shutdown_tx.subscribe();

        let ready = tokio::select! {
            _ = self.processor.ready.wait() => true,
            _ = shutdown.wait_for(|stop| *stop) => false,
            _ = &mut termination => {
                info!("Termination signal received before the consumer was ready");
                false
            }
        };

        if ready {
            self.set_state(LifecycleState::Ready);
            info!("Consumer is ready and consuming messages");
            self.set_state(LifecycleState::Consuming);

            tokio::select! {
                _ = &mut termination => info!("Termination signal received"),
                _ = shutdown.wait_for(|stop| *stop) => info!("Consumer context done"),
            }
        }

        self.stop().await;

        match self.take_outcome() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Cancel the worker, wait for it, then release broker and store
    ///
    /// Safe to call repeatedly and from any task.
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        if self.state() == LifecycleState::Stopped {
            return;
        }

        info!("Stopping consumer...");
        self.set_state(LifecycleState::Stopping);
        self.shutdown_tx.send_replace(true);

        if let Some(handle) = worker.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.record_outcome(e),
                Err(e) => error!(error = %e, "Consumer worker panicked"),
            }
        }

        if let Err(e) = self.broker.close() {
            error!(error = %e, "Error closing consumer");
        }

        if let Some(store) = &self.processor.store {
            if let Err(e) = store.disconnect().await {
                error!(error = %e, "Error disconnecting from MongoDB");
            }
        }

        self.set_state(LifecycleState::Stopped);
        info!("Consumer stopped");
    }

    async fn spawn_worker(&self) -> ClientResult<()> {
        let mut worker = self.worker.lock().await;
        match self.state() {
            LifecycleState::Created => {}
            LifecycleState::Stopping | LifecycleState::Stopped => {
                return Err(ClientError::Closed("consumer"))
            }
            _ => return Err(ClientError::AlreadyStarted),
        }

        info!(topics = ?self.config.topics, group_id = %self.config.group_id, "Starting consumer");
        self.set_state(LifecycleState::Starting);

        *worker = Some(tokio::spawn(run_worker(
            self.broker.clone(),
            self.processor.clone(),
            self.shutdown_tx.clone(),
        )));
        Ok(())
    }

    fn set_state(&self, state: LifecycleState) {
        let previous = self.state_tx.send_replace(state);
        debug!(from = %previous, to = %state, "Consumer state changed");
    }

    fn record_outcome(&self, err: ClientError) {
        if let Ok(mut outcome) = self.outcome.lock() {
            outcome.get_or_insert(err);
        }
    }

    fn take_outcome(&self) -> Option<ClientError> {
        self.outcome.lock().ok().and_then(|mut outcome| outcome.take())
    }
}

/// Worker loop: one `deliver` call per group session until cancelled
async fn run_worker(
    broker: Arc<dyn GroupConsumer>,
    processor: Arc<RecordProcessor>,
    shutdown_tx: watch::Sender<bool>,
) -> ClientResult<()> {
    let shutdown = shutdown_tx.subscribe();

    loop {
        if *shutdown.borrow() {
            info!("Consumer context cancelled");
            return Ok(());
        }

        if let Err(e) = broker.deliver(processor.as_ref(), shutdown.clone()).await {
            error!(error = %e, "Error from consumer");
            // wakes `start` so the lifecycle winds down
            shutdown_tx.send_replace(true);
            return Err(e);
        }
    }
}
