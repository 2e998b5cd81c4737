//! rdkafka client context for consumer-group sessions
//!
//! Rebalance callbacks run inside rdkafka's poll, on whichever task is
//! driving the message stream. The context only bumps generation counters;
//! the session loop watches them to learn when partitions were assigned or
//! revoked.

use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::{ClientContext, TopicPartitionList};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct SessionContext {
    assignments: watch::Sender<u64>,
    revocations: watch::Sender<u64>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            assignments: watch::channel(0).0,
            revocations: watch::channel(0).0,
        }
    }

    /// Ticks once per completed partition assignment
    pub fn assignments(&self) -> watch::Receiver<u64> {
        self.assignments.subscribe()
    }

    /// Ticks once per revocation, i.e. when the current session ends
    pub fn revocations(&self) -> watch::Receiver<u64> {
        self.revocations.subscribe()
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientContext for SessionContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => error!(facility = fac, "librdkafka: {}", log_message),
            RDKafkaLogLevel::Warning => warn!(facility = fac, "librdkafka: {}", log_message),
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => {
                info!(facility = fac, "librdkafka: {}", log_message)
            }
            RDKafkaLogLevel::Debug => debug!(facility = fac, "librdkafka: {}", log_message),
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        error!(error = %error, reason = reason, "librdkafka client error");
    }
}

impl ConsumerContext for SessionContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            info!(partitions_revoked = tpl.count(), "Kafka rebalance: partitions revoked");
            self.revocations.send_modify(|generation| *generation += 1);
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                info!(partitions_assigned = tpl.count(), "Kafka rebalance: partitions assigned");
                self.assignments.send_modify(|generation| *generation += 1);
            }
            Rebalance::Revoke(_) => {}
            Rebalance::Error(err) => warn!(error = %err, "Kafka rebalance error"),
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(partitions = offsets.count(), "Offsets committed"),
            Err(e) => warn!(error = %e, "Offset commit failed"),
        }
    }
}
