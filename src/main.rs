//! Kafka client - Main entry point
//!
//! # Modes
//! - `consumer` (default): join the consumer group and process messages until
//!   SIGINT/SIGTERM, optionally persisting them to MongoDB
//! - `producer`: publish a batch of sample messages and exit
//! - `check`: fetch cluster metadata and list the available topics

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ran_kafka_client::kafka::fetch_topics;
use ran_kafka_client::{
    ConsumerConfig, ConsumerService, EnvConfig, OutgoingMessage, ProducerConfig, ProducerService,
    StoreConfig,
};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Service run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunMode {
    Producer,
    Consumer,
    Check,
}

#[derive(Parser, Debug)]
#[command(name = "ran-kafka-client", about = "Kafka producer and consumer-group client")]
struct Cli {
    /// Which side to run
    #[arg(long, value_enum, default_value = "consumer")]
    mode: RunMode,

    /// Port the local Kafka broker is exposed on; ignored when KAFKA_BROKERS is set
    #[arg(long, default_value = "9092")]
    port: u16,

    /// Topic to produce to, or consume from when KAFKA_TOPICS is unset
    #[arg(long = "kafka-topic", default_value = "my-topic")]
    kafka_topic: String,

    /// Number of messages to publish in producer mode
    #[arg(long, default_value_t = 20, allow_negative_numbers = true)]
    msgcount: i64,

    /// Consumer group id
    #[arg(long, default_value = "example-consumer-group", env = "CONSUMER_GROUP")]
    group: String,

    #[arg(long, default_value = "mongodb://localhost:27017", env = "MONGO_URI")]
    mongo_uri: String,

    #[arg(long, default_value = "kafka-messages", env = "MONGO_DB")]
    mongo_db: String,

    #[arg(long, default_value = "consumed_messages", env = "MONGO_COLLECTION")]
    mongo_collection: String,

    /// Consume without persisting to MongoDB
    #[arg(long)]
    no_store: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    info!(
        mode = ?cli.mode,
        port = cli.port,
        kafka_topic = %cli.kafka_topic,
        msgcount = cli.msgcount,
        group = %cli.group,
        mongo_db = %cli.mongo_db,
        mongo_collection = %cli.mongo_collection,
        no_store = cli.no_store,
        "Starting Kafka client"
    );

    let env = EnvConfig::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    let result = match cli.mode {
        RunMode::Producer => run_producer_mode(&cli, &env).await,
        RunMode::Consumer => run_consumer_mode(&cli, &env).await,
        RunMode::Check => run_check_mode(&cli, &env).await,
    };

    if let Err(e) = &result {
        error!("Kafka client failed: {:#}", e);
    }
    result
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ran_kafka_client=debug,rdkafka=warn,info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Environment brokers win over the `--port` shortcut
fn brokers(cli: &Cli, env: &EnvConfig) -> Vec<String> {
    let brokers = env.brokers();
    if brokers.is_empty() {
        vec![format!("localhost:{}", cli.port)]
    } else {
        brokers
    }
}

fn topics(cli: &Cli, env: &EnvConfig) -> Vec<String> {
    let topics = env.topics();
    if topics.is_empty() {
        vec![cli.kafka_topic.clone()]
    } else {
        topics
    }
}

/// Run in producer mode - publish `msgcount` sample messages
async fn run_producer_mode(cli: &Cli, env: &EnvConfig) -> Result<()> {
    if cli.msgcount < 0 {
        anyhow::bail!("msgcount must not be negative, got {}", cli.msgcount);
    }

    let config = ProducerConfig::new(brokers(cli, env));
    let producer = ProducerService::new(&config).context("Failed to create producer")?;

    let notification = OutgoingMessage::new("Hello, Kafka!")
        .with_key("notification-456")
        .with_header("content-type", "text/plain");

    let mut failed = 0u64;
    for i in 0..cli.msgcount {
        let result = if i % 2 == 0 {
            producer.send(&cli.kafka_topic, &notification).await
        } else {
            let event = OutgoingMessage::new(json!({
                "user_id": 123,
                "action": "login",
                "timestamp": chrono::Utc::now().timestamp(),
            }))
            .with_key("user-123")
            .with_header("content-type", "application/json")
            .with_header("source", "user-service");
            producer.send(&cli.kafka_topic, &event).await
        };

        if let Err(e) = result {
            failed += 1;
            warn!(error = %e, "Failed to send message");
        }
    }

    producer.close().await.context("Failed to close producer")?;

    info!(
        topic = %cli.kafka_topic,
        sent = cli.msgcount as u64 - failed,
        failed,
        "Producer finished"
    );
    Ok(())
}

/// Run in consumer mode - process messages until a termination signal
async fn run_consumer_mode(cli: &Cli, env: &EnvConfig) -> Result<()> {
    let mut config = ConsumerConfig::new(brokers(cli, env), topics(cli, env), cli.group.clone());
    config.offset_reset = env.kafka_offset_reset;

    if cli.no_store {
        info!("MongoDB persistence disabled");
    } else {
        config.store = Some(StoreConfig::new(
            &cli.mongo_uri,
            &cli.mongo_db,
            &cli.mongo_collection,
        ));
    }

    info!(config = ?config, "Consumer configuration loaded");

    let consumer = ConsumerService::connect(config)
        .await
        .context("Failed to create consumer")?;

    if let Err(e) = consumer.start(shutdown_signal()).await {
        if e.is_fatal() {
            error!(error = %e, "Fatal consumer error, shutting down");
        }
        return Err(e).context("Consumer terminated with an error");
    }

    info!("Consumer exited cleanly");
    Ok(())
}

/// Run in check mode - verify the brokers are reachable
async fn run_check_mode(cli: &Cli, env: &EnvConfig) -> Result<()> {
    let brokers = brokers(cli, env);
    info!(brokers = %brokers.join(","), "Checking Kafka connectivity");

    let topics = fetch_topics(&brokers, METADATA_TIMEOUT)
        .await
        .context("Failed to connect to Kafka")?;

    info!(count = topics.len(), "Connected to Kafka");
    for topic in &topics {
        info!(topic = %topic, "Available topic");
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
