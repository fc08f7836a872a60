//! Stable/unstable tier bundle

use chainsync_core::{BlockStore, CheckpointStore, InMemoryBlockStore, InMemoryCheckpointStore};
use std::sync::Arc;

/// Highest height assumed final for a given tip
pub fn stable_boundary(tip_height: u64, max_possible_unstable_blocks: u64) -> u64 {
    tip_height.saturating_sub(max_possible_unstable_blocks)
}

/// Persistence used by one account synchronizer
pub struct TierStore<T> {
    /// Append-only tier at or below the stable boundary
    pub stable: Arc<dyn BlockStore<T>>,
    /// Trailing window, rebuilt every cycle
    pub unstable: Arc<dyn BlockStore<T>>,
    /// Synchronization checkpoint
    pub checkpoint: Arc<dyn CheckpointStore>,
}

impl<T> TierStore<T> {
    /// Bundle existing stores
    pub fn new(
        stable: Arc<dyn BlockStore<T>>,
        unstable: Arc<dyn BlockStore<T>>,
        checkpoint: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            stable,
            unstable,
            checkpoint,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> TierStore<T> {
    /// Fresh in-memory stores
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryBlockStore::new()),
            Arc::new(InMemoryBlockStore::new()),
            Arc::new(InMemoryCheckpointStore::new()),
        )
    }
}

impl<T> Clone for TierStore<T> {
    fn clone(&self) -> Self {
        Self {
            stable: Arc::clone(&self.stable),
            unstable: Arc::clone(&self.unstable),
            checkpoint: Arc::clone(&self.checkpoint),
        }
    }
}
