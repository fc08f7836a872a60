//! Synchronization events
//!
//! Every event is published on a broadcast channel and logged with
//! structured fields.

#![allow(missing_docs)]

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Default event channel capacity
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Synchronization event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Cycle started
    Started { network: &'static str, timestamp: String },
    /// Operation not seen in any previous cycle
    NewOperation { uid: String },
    /// Block written by a successful cycle and not announced before
    NewBlock { height: u64, hash: String },
    /// Checkpoint moved back after the explorer stopped confirming it
    CheckpointRolledBack { from_height: u64, to_height: u64 },
    /// Cycle succeeded
    Succeeded {
        new_operation_count: usize,
        last_block_height: u64,
    },
    /// Cycle failed
    Failed { error: String },
}

/// Event publisher
#[derive(Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventPublisher {
    /// Create new publisher
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Log and publish an event
    pub fn publish(&self, event: SyncEvent) {
        match &event {
            SyncEvent::Started { network, timestamp } => {
                info!(
                    event = "sync_started",
                    network = %network,
                    timestamp = %timestamp,
                    "Synchronization started"
                );
            }
            SyncEvent::NewOperation { uid } => {
                debug!(event = "new_operation", uid = %uid, "New operation");
            }
            SyncEvent::NewBlock { height, hash } => {
                debug!(event = "new_block", height = %height, hash = %hash, "New block");
            }
            SyncEvent::CheckpointRolledBack {
                from_height,
                to_height,
            } => {
                warn!(
                    event = "checkpoint_rolled_back",
                    from_height = %from_height,
                    to_height = %to_height,
                    "Checkpoint rolled back"
                );
            }
            SyncEvent::Succeeded {
                new_operation_count,
                last_block_height,
            } => {
                info!(
                    event = "sync_succeeded",
                    new_operation_count = %new_operation_count,
                    last_block_height = %last_block_height,
                    "Synchronization succeeded"
                );
            }
            SyncEvent::Failed { error: message } => {
                error!(event = "sync_failed", error = %message, "Synchronization failed");
            }
        }

        // No subscribers is fine
        let _ = self.sender.send(event);
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}
