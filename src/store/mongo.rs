//! MongoDB-backed message store

use async_trait::async_trait;
use mongodb::bson::{self, doc, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use tracing::{debug, info};

use super::MessageStore;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::message::Message;

const APP_NAME: &str = "ran-kafka-client";

/// Document shape written to the collection
///
/// Same fields as the logged JSON, except `timestamp` is a BSON datetime so
/// the collection can be range-queried, sorted and TTL-indexed on it.
pub fn message_document(message: &Message) -> StoreResult<Document> {
    let mut document = bson::to_document(message)?;
    document.insert(
        "timestamp",
        bson::DateTime::from_chrono(message.timestamp),
    );
    Ok(document)
}

pub struct MongoMessageStore {
    client: Client,
    collection: Collection<Document>,
}

impl MongoMessageStore {
    /// Connect and ping the deployment so an unreachable store fails here
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        config
            .validate()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|e| StoreError::Connection(format!("invalid MongoDB URI: {e}")))?;
        options.app_name = Some(APP_NAME.to_string());
        options.connect_timeout = Some(config.connect_timeout);
        options.server_selection_timeout = Some(config.connect_timeout);

        let client =
            Client::with_options(options).map_err(|e| StoreError::Connection(e.to_string()))?;

        let database = client.database(&config.database);
        database
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| StoreError::Connection(format!("MongoDB ping failed: {e}")))?;

        let collection = database.collection::<Document>(&config.collection);

        info!(
            database = %config.database,
            collection = %config.collection,
            "Connected to MongoDB"
        );

        Ok(Self { client, collection })
    }
}

#[async_trait]
impl MessageStore for MongoMessageStore {
    async fn insert(&self, message: &Message) -> StoreResult<()> {
        let document = message_document(message)?;
        self.collection.insert_one(document, None).await?;

        debug!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "Message stored in MongoDB"
        );
        Ok(())
    }

    async fn disconnect(&self) -> StoreResult<()> {
        self.client.clone().shutdown().await;
        info!("Disconnected from MongoDB");
        Ok(())
    }
}
