//! Single-fire readiness gate

use std::sync::Arc;
use tokio::sync::watch;

/// Latch that any number of tasks can wait on; only the first `fire` counts
#[derive(Debug, Clone)]
pub struct ReadyGate {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadyGate {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::channel(false).0),
        }
    }

    /// Open the gate; returns false if it was already open
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the gate opens
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives as long as self, so this only returns once ready
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}
