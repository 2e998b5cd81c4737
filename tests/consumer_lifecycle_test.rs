//! Consumer lifecycle controller tests against a scripted broker and a mocked store

mod common;

use async_trait::async_trait;
use mockall::mock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use common::{consumer_config, eventually, record, FakeGroupConsumer};
use ran_kafka_client::{
    ClientError, ConsumerService, LifecycleState, Message, MessageStore, StoreConfig, StoreError,
    StoreResult,
};

mock! {
    pub Store {}

    #[async_trait]
    impl MessageStore for Store {
        async fn insert(&self, message: &Message) -> StoreResult<()>;
        async fn disconnect(&self) -> StoreResult<()>;
    }
}

/// Start the controller in the background; dropping or firing the sender terminates it
fn spawn_consumer(
    consumer: Arc<ConsumerService>,
) -> (oneshot::Sender<()>, tokio::task::JoinHandle<Result<(), ClientError>>) {
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        consumer
            .start(async move {
                let _ = rx.await;
            })
            .await
    });
    (tx, handle)
}

async fn wait_for_state(consumer: &ConsumerService, state: LifecycleState) {
    let mut states = consumer.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == state))
        .await
        .expect("state not reached in time")
        .expect("state channel closed");
}

#[tokio::test]
async fn test_acknowledges_in_delivery_order_without_store() {
    let broker = Arc::new(FakeGroupConsumer::new().with_session(vec![
        record("orders", 0, 10, br#"{"order_id":10}"#),
        record("orders", 0, 11, br#"{"order_id":11}"#),
        record("orders", 0, 12, b"not json"),
    ]));
    let consumer = Arc::new(ConsumerService::with_parts(
        consumer_config(),
        broker.clone(),
        None,
    ));

    let (terminate, handle) = spawn_consumer(consumer.clone());
    eventually(|| broker.ack_count() == 3).await;
    assert!(consumer.is_ready());

    terminate.send(()).unwrap();
    handle.await.unwrap().expect("clean shutdown");

    assert_eq!(
        broker.acks(),
        vec![
            ("orders".to_string(), 0, 10),
            ("orders".to_string(), 0, 11),
            ("orders".to_string(), 0, 12),
        ]
    );
    assert_eq!(consumer.state(), LifecycleState::Stopped);
    assert_eq!(broker.close_calls(), 1);
    assert!(!broker.closed_while_delivering());
}

#[tokio::test]
async fn test_acknowledgements_follow_partition_order() {
    let broker = Arc::new(FakeGroupConsumer::new().with_session(vec![
        record("orders", 0, 1, b"{}"),
        record("orders", 1, 7, b"{}"),
        record("orders", 0, 2, b"{}"),
        record("orders", 1, 8, b"{}"),
        record("orders", 0, 3, b"{}"),
    ]));
    let consumer = Arc::new(ConsumerService::with_parts(
        consumer_config(),
        broker.clone(),
        None,
    ));

    let (terminate, handle) = spawn_consumer(consumer);
    eventually(|| broker.ack_count() == 5).await;
    terminate.send(()).unwrap();
    handle.await.unwrap().unwrap();

    let acks = broker.acks();
    let offsets = |partition: i32| -> Vec<i64> {
        acks.iter()
            .filter(|(_, p, _)| *p == partition)
            .map(|(_, _, offset)| *offset)
            .collect()
    };
    assert_eq!(offsets(0), vec![1, 2, 3]);
    assert_eq!(offsets(1), vec![7, 8]);
}

#[tokio::test]
async fn test_stores_before_acknowledging() {
    let broker = Arc::new(FakeGroupConsumer::new().with_session(vec![
        record("orders", 0, 789, br#"{"order_id":789,"status":"completed"}"#),
    ]));

    let mut store = MockStore::new();
    store
        .expect_insert()
        .withf(|message: &Message| {
            message.topic == "orders"
                && message.offset == 789
                && message.value["status"] == "completed"
        })
        .times(1)
        .returning(|_| Ok(()));
    store.expect_disconnect().times(1).returning(|| Ok(()));

    let consumer = Arc::new(ConsumerService::with_parts(
        consumer_config(),
        broker.clone(),
        Some(Arc::new(store)),
    ));

    let (terminate, handle) = spawn_consumer(consumer);
    eventually(|| broker.ack_count() == 1).await;
    terminate.send(()).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(broker.acks(), vec![("orders".to_string(), 0, 789)]);
}

#[tokio::test]
async fn test_failing_store_leaves_records_unacknowledged() {
    let broker = Arc::new(FakeGroupConsumer::new().with_session(vec![
        record("orders", 0, 10, b"{}"),
        record("orders", 0, 11, b"{}"),
        record("orders", 0, 12, b"{}"),
    ]));

    let attempts = Arc::new(AtomicUsize::new(0));
    let mut store = MockStore::new();
    {
        let attempts = attempts.clone();
        store.expect_insert().times(3).returning(move |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Insert("connection refused".to_string()))
        });
    }
    store.expect_disconnect().times(1).returning(|| Ok(()));

    let consumer = Arc::new(ConsumerService::with_parts(
        consumer_config(),
        broker.clone(),
        Some(Arc::new(store)),
    ));

    let (terminate, handle) = spawn_consumer(consumer.clone());
    eventually(|| attempts.load(Ordering::SeqCst) == 3).await;

    // store failures never end the lifecycle
    wait_for_state(&consumer, LifecycleState::Consuming).await;

    terminate.send(()).unwrap();
    handle.await.unwrap().expect("store failures are not fatal");
    assert!(broker.acks().is_empty());
}

struct SlowStore {
    delay: Duration,
}

#[async_trait]
impl MessageStore for SlowStore {
    async fn insert(&self, _message: &Message) -> StoreResult<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn disconnect(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_insert_timeout_skips_acknowledgement() {
    let broker = Arc::new(
        FakeGroupConsumer::new().with_session(vec![record("orders", 0, 5, b"{}")]),
    );

    let mut store_config = StoreConfig::new("mongodb://localhost:27017", "kafka_data", "messages");
    store_config.insert_timeout = Duration::from_millis(20);
    let config = consumer_config().with_store(store_config);

    let consumer = Arc::new(ConsumerService::with_parts(
        config,
        broker.clone(),
        Some(Arc::new(SlowStore {
            delay: Duration::from_secs(10),
        })),
    ));

    let (terminate, handle) = spawn_consumer(consumer.clone());
    wait_for_state(&consumer, LifecycleState::Consuming).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    terminate.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert!(broker.acks().is_empty());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let broker = Arc::new(FakeGroupConsumer::new().with_session(Vec::new()));
    let consumer = Arc::new(ConsumerService::with_parts(
        consumer_config(),
        broker.clone(),
        None,
    ));

    let (_terminate, handle) = spawn_consumer(consumer.clone());
    wait_for_state(&consumer, LifecycleState::Consuming).await;

    tokio::join!(consumer.stop(), consumer.stop());
    consumer.stop().await;

    handle.await.unwrap().expect("stop ends the lifecycle cleanly");
    assert_eq!(consumer.state(), LifecycleState::Stopped);
    assert_eq!(broker.close_calls(), 1);
    assert!(!broker.closed_while_delivering());
}

#[tokio::test]
async fn test_fatal_deliver_error_propagates_from_start() {
    let broker = Arc::new(
        FakeGroupConsumer::new()
            .with_session(Vec::new())
            .with_fatal_error("broker transport failure"),
    );
    let consumer = ConsumerService::with_parts(consumer_config(), broker.clone(), None);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        consumer.start(std::future::pending::<()>()),
    )
    .await
    .expect("start should return after a fatal error");

    match result {
        Err(ClientError::Deliver(message)) => assert_eq!(message, "broker transport failure"),
        other => panic!("expected a deliver error, got {other:?}"),
    }
    assert_eq!(consumer.state(), LifecycleState::Stopped);
    assert_eq!(broker.close_calls(), 1);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let broker = Arc::new(FakeGroupConsumer::new().with_session(Vec::new()));
    let consumer = Arc::new(ConsumerService::with_parts(
        consumer_config(),
        broker.clone(),
        None,
    ));

    let (terminate, handle) = spawn_consumer(consumer.clone());
    wait_for_state(&consumer, LifecycleState::Consuming).await;

    let second = consumer.start(std::future::pending::<()>()).await;
    assert!(matches!(second, Err(ClientError::AlreadyStarted)));

    terminate.send(()).unwrap();
    handle.await.unwrap().unwrap();

    let after_stop = consumer.start(std::future::pending::<()>()).await;
    assert!(matches!(after_stop, Err(ClientError::Closed(_))));
}

#[tokio::test]
async fn test_stop_before_ready() {
    // no session is ever assigned
    let broker = Arc::new(FakeGroupConsumer::new());
    let consumer = Arc::new(ConsumerService::with_parts(
        consumer_config(),
        broker.clone(),
        None,
    ));

    let (_terminate, handle) = spawn_consumer(consumer.clone());
    wait_for_state(&consumer, LifecycleState::Starting).await;
    assert!(!consumer.is_ready());

    consumer.stop().await;
    handle.await.unwrap().unwrap();

    assert!(!consumer.is_ready());
    assert_eq!(consumer.state(), LifecycleState::Stopped);
    assert_eq!(broker.close_calls(), 1);
}

#[tokio::test]
async fn test_termination_before_ready() {
    let broker = Arc::new(FakeGroupConsumer::new());
    let consumer = ConsumerService::with_parts(consumer_config(), broker.clone(), None);

    consumer.start(async {}).await.unwrap();

    assert_eq!(consumer.state(), LifecycleState::Stopped);
    assert!(broker.acks().is_empty());
    assert_eq!(broker.close_calls(), 1);
}

#[tokio::test]
async fn test_readiness_fires_once_across_rebalances() {
    let broker = Arc::new(
        FakeGroupConsumer::new()
            .with_session(vec![record("orders", 0, 1, b"{}")])
            .with_session(vec![record("orders", 0, 2, b"{}")]),
    );
    let consumer = Arc::new(ConsumerService::with_parts(
        consumer_config(),
        broker.clone(),
        None,
    ));

    let (terminate, handle) = spawn_consumer(consumer.clone());
    eventually(|| broker.ack_count() == 2).await;
    assert!(consumer.is_ready());
    assert_eq!(consumer.state(), LifecycleState::Consuming);

    terminate.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert_eq!(
        broker.acks(),
        vec![("orders".to_string(), 0, 1), ("orders".to_string(), 0, 2)]
    );
}

#[tokio::test]
async fn test_connect_fails_setup_when_store_unreachable() {
    // nothing listens on port 1; the Kafka client connects lazily
    let mut store_config = StoreConfig::new("mongodb://127.0.0.1:1", "kafka-messages", "consumed_messages");
    store_config.connect_timeout = Duration::from_millis(200);
    let config = consumer_config().with_store(store_config);

    let result = tokio::time::timeout(Duration::from_secs(10), ConsumerService::connect(config))
        .await
        .expect("connect should give up after the store timeout");

    match result {
        Err(ClientError::Setup(message)) => assert!(message.contains("MongoDB")),
        Err(other) => panic!("expected a setup error, got {other:?}"),
        Ok(_) => panic!("connect should fail without a reachable store"),
    }
}

#[tokio::test]
async fn test_connect_rejects_invalid_config() {
    let config = consumer_config()
        .with_store(StoreConfig::new("mongodb://localhost:27017", "kafka-messages", ""));

    let result = ConsumerService::connect(config).await;
    assert!(matches!(result, Err(ClientError::Config(_))));
}
