//! Explorer interface and an in-process fixture implementation

use crate::{Error, Result};
use async_trait::async_trait;
use chainsync_core::{Address, BlockHeader, ChainTransaction, Network};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// One explorer page
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionBulk<T> {
    /// Transactions, starting at the requested block
    pub transactions: Vec<T>,
    /// Whether the explorer cut the page short
    pub truncated: bool,
}

/// Remote paginated ledger query interface
#[async_trait]
pub trait Explorer<N: Network>: Send + Sync {
    /// Transactions touching `addresses` at heights >= the height of
    /// `from_block_hash`.
    ///
    /// When `truncated` is set the page holds at least one complete block.
    async fn get_transactions(
        &self,
        addresses: &[Address],
        from_block_hash: &str,
    ) -> Result<TransactionBulk<N::Transaction>>;

    /// Current chain tip
    async fn get_current_block(&self) -> Result<BlockHeader>;

    /// Header at a height on the explorer's current chain
    async fn get_block(&self, height: u64) -> Result<Option<BlockHeader>>;
}

/// Complete ledger served by [`FixtureExplorer`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureLedger<T> {
    /// Hash the explorer treats as height 0, if not a listed block
    #[serde(default)]
    pub genesis_hash: Option<String>,
    /// Chain headers
    pub blocks: Vec<BlockHeader>,
    /// Confirmed transactions
    #[serde(default = "Vec::new")]
    pub transactions: Vec<T>,
}

impl<T: ChainTransaction> FixtureLedger<T> {
    /// Create empty ledger
    pub fn new() -> Self {
        Self {
            genesis_hash: None,
            blocks: Vec::new(),
            transactions: Vec::new(),
        }
    }

    /// Load from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let ledger: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        ledger.validate()?;
        Ok(ledger)
    }

    /// Set hash treated as height 0
    pub fn with_genesis_hash(mut self, hash: impl Into<String>) -> Self {
        self.genesis_hash = Some(hash.into());
        self
    }

    /// Add a block header
    pub fn with_block(mut self, header: BlockHeader) -> Self {
        self.blocks.push(header);
        self
    }

    /// Add a confirmed transaction
    pub fn with_transaction(mut self, transaction: T) -> Self {
        self.transactions.push(transaction);
        self
    }

    /// Highest block
    pub fn tip(&self) -> Option<&BlockHeader> {
        self.blocks.iter().max_by_key(|b| b.height)
    }

    /// Block at a height
    pub fn block_at(&self, height: u64) -> Option<&BlockHeader> {
        self.blocks.iter().find(|b| b.height == height)
    }

    /// Height of a block hash
    pub fn height_of(&self, hash: &str) -> Option<u64> {
        if self.genesis_hash.as_deref() == Some(hash) {
            return Some(0);
        }
        self.blocks.iter().find(|b| b.hash == hash).map(|b| b.height)
    }

    /// Check every transaction sits in a listed block
    pub fn validate(&self) -> Result<()> {
        for tx in &self.transactions {
            let block = tx.block().ok_or_else(|| {
                Error::Config(format!("transaction {} is unconfirmed", tx.hash()))
            })?;
            if self.block_at(block.height) != Some(block) {
                return Err(Error::Config(format!(
                    "transaction {} references unknown block {} at height {}",
                    tx.hash(),
                    block.hash,
                    block.height
                )));
            }
        }
        Ok(())
    }
}

impl<T: ChainTransaction> Default for FixtureLedger<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Query as received by [`FixtureExplorer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedQuery {
    /// Requested addresses
    pub addresses: Vec<Address>,
    /// Starting block hash
    pub from_block_hash: String,
}

/// In-process explorer over a [`FixtureLedger`].
///
/// Pages are ordered by height then hash. With a page size set, a page is
/// cut after that many transactions but always extended to finish its
/// lowest block.
pub struct FixtureExplorer<N: Network> {
    ledger: RwLock<FixtureLedger<N::Transaction>>,
    page_size: Option<usize>,
    queries: Mutex<Vec<RecordedQuery>>,
    failing: AtomicBool,
}

impl<N: Network> FixtureExplorer<N> {
    /// Create explorer serving a ledger
    pub fn new(ledger: FixtureLedger<N::Transaction>) -> Self {
        Self {
            ledger: RwLock::new(ledger),
            page_size: None,
            queries: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Truncate pages after `page_size` transactions
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Swap the served ledger (simulates a reorganization)
    pub fn replace_ledger(&self, ledger: FixtureLedger<N::Transaction>) {
        *self.ledger.write() = ledger;
    }

    /// Make every subsequent transaction query fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Every transaction query received so far
    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.queries.lock().clone()
    }

    /// Number of transaction queries received
    pub fn query_count(&self) -> usize {
        self.queries.lock().len()
    }

    /// Union of all queried addresses
    pub fn queried_addresses(&self) -> HashSet<Address> {
        self.queries
            .lock()
            .iter()
            .flat_map(|q| q.addresses.iter().cloned())
            .collect()
    }

    /// Forget recorded queries
    pub fn clear_queries(&self) {
        self.queries.lock().clear();
    }
}

#[async_trait]
impl<N: Network> Explorer<N> for FixtureExplorer<N> {
    async fn get_transactions(
        &self,
        addresses: &[Address],
        from_block_hash: &str,
    ) -> Result<TransactionBulk<N::Transaction>> {
        self.queries.lock().push(RecordedQuery {
            addresses: addresses.to_vec(),
            from_block_hash: from_block_hash.to_string(),
        });
        if self.failing.load(Ordering::Acquire) {
            return Err(Error::RemoteQuery("fixture explorer unavailable".to_string()));
        }

        let ledger = self.ledger.read();
        let start = ledger
            .height_of(from_block_hash)
            .ok_or_else(|| Error::BlockNotFound(from_block_hash.to_string()))?;
        let wanted: HashSet<&Address> = addresses.iter().collect();

        let mut matching: Vec<N::Transaction> = ledger
            .transactions
            .iter()
            .filter(|tx| tx.block_height().is_some_and(|h| h >= start))
            .filter(|tx| {
                tx.output_addresses()
                    .iter()
                    .chain(tx.input_addresses().iter())
                    .any(|a| wanted.contains(a))
            })
            .cloned()
            .collect();
        drop(ledger);

        matching.sort_by(|a, b| {
            a.block_height()
                .cmp(&b.block_height())
                .then_with(|| a.hash().cmp(b.hash()))
        });

        let page_size = match self.page_size {
            Some(size) if matching.len() > size => size,
            _ => {
                return Ok(TransactionBulk {
                    transactions: matching,
                    truncated: false,
                })
            }
        };

        let lowest = matching[0].block_height();
        let lowest_block_len = matching
            .iter()
            .take_while(|tx| tx.block_height() == lowest)
            .count();
        let cut = page_size.max(lowest_block_len);
        let truncated = cut < matching.len();
        matching.truncate(cut);

        Ok(TransactionBulk {
            transactions: matching,
            truncated,
        })
    }

    async fn get_current_block(&self) -> Result<BlockHeader> {
        self.ledger
            .read()
            .tip()
            .cloned()
            .ok_or_else(|| Error::RemoteQuery("fixture ledger has no blocks".to_string()))
    }

    async fn get_block(&self, height: u64) -> Result<Option<BlockHeader>> {
        Ok(self.ledger.read().block_at(height).cloned())
    }
}
