//! Producer and consumer services built on the Kafka and store capabilities

pub mod consumer;
pub mod producer;
pub mod ready;

pub use consumer::{ConsumerService, LifecycleState, STORE_INSERT_TIMEOUT};
pub use producer::ProducerService;
pub use ready::ReadyGate;
