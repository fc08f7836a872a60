//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chainsync_core::{
    Address, BitcoinLikeNetwork, BitcoinLikeTransaction, BlockHeader, BlockStore, DerivedKeychain,
    FilledBlock, KeychainChain, SequentialDeriver,
};
use chainsync_engine::{
    AccountSynchronizer, Explorer, FixtureExplorer, FixtureLedger, TierStore, TransactionBulk,
};
use chainsync_params::SynchronizerConfiguration;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

pub type Ledger = FixtureLedger<BitcoinLikeTransaction>;
pub type Fixture = FixtureExplorer<BitcoinLikeNetwork>;
pub type Synchronizer = AccountSynchronizer<BitcoinLikeNetwork>;
pub type Keychain = DerivedKeychain<SequentialDeriver>;

pub fn header(height: u64) -> BlockHeader {
    BlockHeader::new(height, format!("block {}", height), height as i64)
}

pub fn fork_header(height: u64) -> BlockHeader {
    BlockHeader::new(height, format!("fork {}", height), height as i64)
}

/// Linear chain `block 1..=tip` on top of `"genesis"`
pub fn chain(tip: u64) -> Ledger {
    (1..=tip).fold(FixtureLedger::new().with_genesis_hash("genesis"), |ledger, h| {
        ledger.with_block(header(h))
    })
}

pub fn pay(hash: &str, block: BlockHeader, to: &str) -> BitcoinLikeTransaction {
    BitcoinLikeTransaction::new(hash)
        .in_block(block)
        .with_input("X", 10_000)
        .with_output(to, 10_000)
}

pub fn config(window: u64) -> SynchronizerConfiguration {
    SynchronizerConfiguration::default()
        .with_max_possible_unstable_blocks(window)
        .with_batch_size(2)
        .with_gap_size(3)
        .with_genesis_block_hash("genesis")
}

pub fn keychain(used: u32) -> Arc<Keychain> {
    Arc::new(DerivedKeychain::with_used_count(
        SequentialDeriver::new(0),
        KeychainChain::Receive,
        used,
    ))
}

pub fn synchronizer(
    config: SynchronizerConfiguration,
    explorer: Arc<dyn Explorer<BitcoinLikeNetwork>>,
    keychain: Arc<Keychain>,
    tiers: TierStore<BitcoinLikeTransaction>,
) -> Synchronizer {
    AccountSynchronizer::new(config, explorer, vec![keychain], tiers).unwrap()
}

pub fn block_hashes(store: &dyn BlockStore<BitcoinLikeTransaction>) -> Vec<(u64, String)> {
    store
        .get_all_blocks()
        .unwrap()
        .into_iter()
        .map(|block| (block.header.height, block.header.hash))
        .collect()
}

/// Explorer wrapper counting tip requests
pub struct CountingExplorer {
    pub inner: Arc<Fixture>,
    pub tip_requests: AtomicUsize,
}

impl CountingExplorer {
    pub fn new(inner: Arc<Fixture>) -> Self {
        Self {
            inner,
            tip_requests: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Explorer<BitcoinLikeNetwork> for CountingExplorer {
    async fn get_transactions(
        &self,
        addresses: &[Address],
        from_block_hash: &str,
    ) -> chainsync_engine::Result<TransactionBulk<BitcoinLikeTransaction>> {
        tokio::task::yield_now().await;
        self.inner.get_transactions(addresses, from_block_hash).await
    }

    async fn get_current_block(&self) -> chainsync_engine::Result<BlockHeader> {
        self.tip_requests.fetch_add(1, Ordering::SeqCst);
        self.inner.get_current_block().await
    }

    async fn get_block(&self, height: u64) -> chainsync_engine::Result<Option<BlockHeader>> {
        self.inner.get_block(height).await
    }
}

/// Block store that refuses writes at or above a height until healed
pub struct FailingBlockStore {
    pub inner: chainsync_core::InMemoryBlockStore<BitcoinLikeTransaction>,
    fail_from: AtomicU64,
}

impl FailingBlockStore {
    pub fn new(fail_from: u64) -> Self {
        Self {
            inner: chainsync_core::InMemoryBlockStore::new(),
            fail_from: AtomicU64::new(fail_from),
        }
    }

    /// Accept every write from now on
    pub fn heal(&self) {
        self.fail_from.store(u64::MAX, Ordering::SeqCst);
    }
}

impl BlockStore<BitcoinLikeTransaction> for FailingBlockStore {
    fn add_block(&self, block: &FilledBlock<BitcoinLikeTransaction>) -> chainsync_core::Result<bool> {
        if block.height() >= self.fail_from.load(Ordering::SeqCst) {
            return Err(chainsync_core::Error::Storage(format!(
                "disk full writing block {}",
                block.height()
            )));
        }
        self.inner.add_block(block)
    }

    fn remove_blocks_up_to(&self, height: u64) -> chainsync_core::Result<usize> {
        self.inner.remove_blocks_up_to(height)
    }

    fn remove_blocks_from(&self, height: u64) -> chainsync_core::Result<usize> {
        self.inner.remove_blocks_from(height)
    }

    fn clear(&self) -> chainsync_core::Result<()> {
        self.inner.clear()
    }

    fn get_blocks(
        &self,
        from: u64,
        to: u64,
    ) -> chainsync_core::Result<Vec<FilledBlock<BitcoinLikeTransaction>>> {
        self.inner.get_blocks(from, to)
    }

    fn get_last_block_header(&self) -> chainsync_core::Result<Option<BlockHeader>> {
        self.inner.get_last_block_header()
    }
}
