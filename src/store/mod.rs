//! Document store for consumed messages

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::message::Message;

pub mod mongo;

pub use mongo::MongoMessageStore;

/// Persists consumed messages
///
/// The consumer applies its own insert timeout around `insert`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert one message as a document
    async fn insert(&self, message: &Message) -> StoreResult<()>;

    /// Tear down the connection
    async fn disconnect(&self) -> StoreResult<()>;
}
