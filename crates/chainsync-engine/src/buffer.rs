//! Height-keyed accumulator for transactions arriving out of order

use crate::{Error, Result};
use chainsync_core::ChainTransaction;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

const SHARD_COUNT: usize = 16;

struct Shard<T> {
    pending: HashMap<u64, Vec<T>>,
    finalized: HashSet<u64>,
}

impl<T> Default for Shard<T> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
            finalized: HashSet::new(),
        }
    }
}

/// Transactions buffered per height until the height is finalized.
///
/// Sharded by height so batches touching different heights never contend.
pub struct PartialBlockBuffer<T> {
    shards: Box<[Mutex<Shard<T>>]>,
}

impl<T: ChainTransaction> PartialBlockBuffer<T> {
    /// Create empty buffer
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Shard::default())).collect(),
        }
    }

    fn shard(&self, height: u64) -> &Mutex<Shard<T>> {
        &self.shards[(height % SHARD_COUNT as u64) as usize]
    }

    /// Add transactions for a height
    pub fn append(&self, height: u64, transactions: impl IntoIterator<Item = T>) -> Result<()> {
        let mut shard = self.shard(height).lock();
        if shard.finalized.contains(&height) {
            return Err(Error::InvariantViolation(format!(
                "transaction arrived for already finalized height {}",
                height
            )));
        }
        shard.pending.entry(height).or_default().extend(transactions);
        Ok(())
    }

    /// Read and evict everything buffered for a height.
    ///
    /// Allowed once per height. Duplicates reported by several batches are
    /// merged and the result is ordered by transaction hash.
    pub fn take_and_remove(&self, height: u64) -> Result<Vec<T>> {
        let mut shard = self.shard(height).lock();
        if !shard.finalized.insert(height) {
            return Err(Error::InvariantViolation(format!(
                "height {} finalized twice",
                height
            )));
        }
        let mut transactions = shard.pending.remove(&height).unwrap_or_default();
        drop(shard);

        transactions.sort_by(|a, b| a.hash().cmp(b.hash()));
        transactions.dedup_by(|a, b| a.hash() == b.hash());
        Ok(transactions)
    }

    /// Whether nothing is buffered for a height
    pub fn is_empty(&self, height: u64) -> bool {
        self.shard(height)
            .lock()
            .pending
            .get(&height)
            .map_or(true, |txs| txs.is_empty())
    }

    /// Number of heights with buffered transactions
    pub fn pending_heights(&self) -> usize {
        self.shards.iter().map(|s| s.lock().pending.len()).sum()
    }
}

impl<T: ChainTransaction> Default for PartialBlockBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
