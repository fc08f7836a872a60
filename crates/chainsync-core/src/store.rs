//! Block tier and checkpoint persistence traits, with in-memory backends

use crate::{BlockHeader, Checkpoint, FilledBlock, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Height-indexed store of filled blocks (one tier)
pub trait BlockStore<T>: Send + Sync {
    /// Insert a block.
    ///
    /// Insert-or-ignore: returns `false` if a block at that height already
    /// exists, leaving the stored one untouched.
    fn add_block(&self, block: &FilledBlock<T>) -> Result<bool>;

    /// Remove every block with height <= `height`
    fn remove_blocks_up_to(&self, height: u64) -> Result<usize>;

    /// Remove every block with height >= `height`
    fn remove_blocks_from(&self, height: u64) -> Result<usize>;

    /// Remove all blocks
    fn clear(&self) -> Result<()>;

    /// Blocks with `from <= height <= to`, ascending
    fn get_blocks(&self, from: u64, to: u64) -> Result<Vec<FilledBlock<T>>>;

    /// Header of the highest stored block
    fn get_last_block_header(&self) -> Result<Option<BlockHeader>>;

    /// Every stored block, ascending
    fn get_all_blocks(&self) -> Result<Vec<FilledBlock<T>>> {
        self.get_blocks(0, u64::MAX)
    }
}

/// Durable synchronization checkpoint
pub trait CheckpointStore: Send + Sync {
    /// Load the saved checkpoint, if any
    fn load(&self) -> Result<Option<Checkpoint>>;

    /// Persist a checkpoint, replacing the previous one
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// In-memory block tier
pub struct InMemoryBlockStore<T> {
    blocks: RwLock<BTreeMap<u64, FilledBlock<T>>>,
}

impl<T> InMemoryBlockStore<T> {
    /// Create empty store
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored blocks
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

impl<T> Default for InMemoryBlockStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> BlockStore<T> for InMemoryBlockStore<T> {
    fn add_block(&self, block: &FilledBlock<T>) -> Result<bool> {
        let mut blocks = self.blocks.write();
        if blocks.contains_key(&block.height()) {
            return Ok(false);
        }
        blocks.insert(block.height(), block.clone());
        Ok(true)
    }

    fn remove_blocks_up_to(&self, height: u64) -> Result<usize> {
        let mut blocks = self.blocks.write();
        let kept = match height.checked_add(1) {
            Some(next) => blocks.split_off(&next),
            None => BTreeMap::new(),
        };
        let removed = blocks.len();
        *blocks = kept;
        Ok(removed)
    }

    fn remove_blocks_from(&self, height: u64) -> Result<usize> {
        let mut blocks = self.blocks.write();
        let removed = blocks.split_off(&height);
        Ok(removed.len())
    }

    fn clear(&self) -> Result<()> {
        self.blocks.write().clear();
        Ok(())
    }

    fn get_blocks(&self, from: u64, to: u64) -> Result<Vec<FilledBlock<T>>> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self
            .blocks
            .read()
            .range(from..=to)
            .map(|(_, block)| block.clone())
            .collect())
    }

    fn get_last_block_header(&self) -> Result<Option<BlockHeader>> {
        Ok(self
            .blocks
            .read()
            .values()
            .next_back()
            .map(|block| block.header.clone()))
    }
}

/// In-memory checkpoint slot
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoint: RwLock<Option<Checkpoint>>,
}

impl InMemoryCheckpointStore {
    /// Create empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Create slot holding an initial checkpoint
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            checkpoint: RwLock::new(Some(checkpoint)),
        }
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoint.read().clone())
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        *self.checkpoint.write() = Some(checkpoint.clone());
        Ok(())
    }
}
