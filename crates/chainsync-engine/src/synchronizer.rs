//! Account synchronizer
//!
//! One cycle:
//! 1. load the checkpoint (or anchor at the configured genesis hash)
//! 2. query the tip and confirm the checkpoint is still on the explorer's chain
//! 3. scan `(checkpoint, tip - max_possible_unstable_blocks]` into the stable
//!    tier
//! 4. rebuild the unstable tier from the rest of the chain
//! 5. persist the checkpoint at the last stable block written
//!
//! A failed cycle leaves the stored checkpoint and unstable tier as the last
//! successful cycle left them.
//!
//! A `synchronize()` call made while a cycle is running joins that cycle
//! and receives the same outcome.

use crate::events::{EventPublisher, SyncEvent};
use crate::explorer::Explorer;
use crate::progress::{SyncProgress, SyncStage};
use crate::scanner::{RangeScanner, ScanRange};
use crate::tier::{stable_boundary, TierStore};
use crate::{Error, Result};
use chainsync_core::{
    AddressSpace, BlockHeader, BlockStore, ChainTransaction, Checkpoint, InMemoryBlockStore, Network,
};
use chainsync_params::SynchronizerConfiguration;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Outcome of a successful cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Operations not seen in any previous cycle
    pub new_operations: Vec<String>,
    /// Blocks not announced by any previous cycle, stable first
    pub new_blocks: Vec<BlockHeader>,
    /// Tip the cycle synchronized to
    pub last_block: BlockHeader,
    /// Checkpoint after the cycle
    pub checkpoint: Checkpoint,
    /// Blocks inserted into the stable tier
    pub stable_blocks_written: usize,
    /// Blocks written to the rebuilt unstable tier
    pub unstable_blocks_written: usize,
}

impl SyncReport {
    /// Number of new operations
    pub fn new_operation_count(&self) -> usize {
        self.new_operations.len()
    }
}

type CycleOutcome = Option<Result<SyncReport>>;

/// Account synchronizer
pub struct AccountSynchronizer<N: Network> {
    inner: Arc<SyncInner<N>>,
}

struct SyncInner<N: Network> {
    config: SynchronizerConfiguration,
    explorer: Arc<dyn Explorer<N>>,
    keychains: Vec<Arc<dyn AddressSpace>>,
    tiers: TierStore<N::Transaction>,
    scanner: RangeScanner<N>,
    events: EventPublisher,
    progress: SyncProgress,
    in_flight: Mutex<Option<watch::Receiver<CycleOutcome>>>,
}

impl<N: Network> Clone for AccountSynchronizer<N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<N: Network> AccountSynchronizer<N> {
    /// Create synchronizer for one account.
    ///
    /// `keychains` are scanned together (typically receive and change).
    pub fn new(
        config: SynchronizerConfiguration,
        explorer: Arc<dyn Explorer<N>>,
        keychains: Vec<Arc<dyn AddressSpace>>,
        tiers: TierStore<N::Transaction>,
    ) -> Result<Self> {
        config.validate()?;
        if keychains.is_empty() {
            return Err(Error::Config("at least one keychain is required".to_string()));
        }

        let events = EventPublisher::default();
        let progress = SyncProgress::new();
        let scanner = RangeScanner::new(Arc::clone(&explorer), &config, progress.clone());

        Ok(Self {
            inner: Arc::new(SyncInner {
                config,
                explorer,
                keychains,
                tiers,
                scanner,
                events,
                progress,
                in_flight: Mutex::new(None),
            }),
        })
    }

    /// Configuration
    pub fn config(&self) -> &SynchronizerConfiguration {
        &self.inner.config
    }

    /// Stores this synchronizer writes to
    pub fn tiers(&self) -> &TierStore<N::Transaction> {
        &self.inner.tiers
    }

    /// Progress of the current or last cycle
    pub fn progress(&self) -> SyncProgress {
        self.inner.progress.clone()
    }

    /// Subscribe to synchronization events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Whether a cycle is running
    pub fn is_synchronizing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Run one cycle, or join the one already running
    pub async fn synchronize(&self) -> Result<SyncReport> {
        let mut outcome = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(running) => {
                    tracing::debug!("{}: joining running synchronization", N::NAME);
                    running.clone()
                }
                None => {
                    let (sender, receiver) = watch::channel(None);
                    *slot = Some(receiver.clone());

                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        let guard = InFlightGuard(Arc::clone(&inner));
                        let result = inner.run_cycle().await;
                        drop(guard);
                        let _ = sender.send(Some(result));
                    });
                    receiver
                }
            }
        };

        let result = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Task("synchronization task ended without a result".to_string()))?
            .clone();
        result.unwrap_or_else(|| Err(Error::Task("missing synchronization result".to_string())))
    }
}

/// Frees the in-flight slot when the cycle task ends, including by panic
struct InFlightGuard<N: Network>(Arc<SyncInner<N>>);

impl<N: Network> Drop for InFlightGuard<N> {
    fn drop(&mut self) {
        *self.0.in_flight.lock() = None;
    }
}

impl<N: Network> SyncInner<N> {
    async fn run_cycle(&self) -> Result<SyncReport> {
        self.progress.start();
        self.events.publish(SyncEvent::Started {
            network: N::NAME,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });

        match self.cycle().await {
            Ok(report) => {
                self.progress.complete();
                for block in &report.new_blocks {
                    self.events.publish(SyncEvent::NewBlock {
                        height: block.height,
                        hash: block.hash.clone(),
                    });
                }
                for uid in &report.new_operations {
                    self.events.publish(SyncEvent::NewOperation { uid: uid.clone() });
                }
                self.events.publish(SyncEvent::Succeeded {
                    new_operation_count: report.new_operation_count(),
                    last_block_height: report.last_block.height,
                });
                tracing::info!("{}: {}", N::NAME, self.progress.summary());
                Ok(report)
            }
            Err(e) => {
                self.progress.reset();
                self.events.publish(SyncEvent::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn cycle(&self) -> Result<SyncReport> {
        let mut checkpoint = match self.tiers.checkpoint.load()? {
            Some(checkpoint) => checkpoint,
            None => Checkpoint::genesis(&self.config.genesis_block_hash),
        };

        let tip = self.explorer.get_current_block().await?;
        self.progress.set_target(tip.height);

        if self.config.verify_checkpoint && !checkpoint.is_genesis() {
            checkpoint = self.verify_checkpoint(checkpoint, &tip).await?;
        }

        // Stable blocks above the checkpoint come from a cycle that failed
        // before reporting them; rescan them like any other new block.
        let leftover = self
            .tiers
            .stable
            .remove_blocks_from(checkpoint.stable_height + 1)?;
        if leftover > 0 {
            tracing::debug!(
                "{}: dropped {} unconfirmed stable blocks above checkpoint {}",
                N::NAME,
                leftover,
                checkpoint.stable_height
            );
        }

        let boundary = stable_boundary(tip.height, self.config.max_possible_unstable_blocks);
        tracing::info!(
            "{}: tip {} ({}), stable boundary {}, checkpoint {}",
            N::NAME,
            tip.height,
            tip.hash,
            boundary,
            checkpoint.stable_height
        );

        // Blocks and operations already reported through the unstable window
        // of the last successful cycle
        let previous = self.tiers.unstable.get_all_blocks()?;
        let mut seen: HashSet<String> = previous
            .iter()
            .flat_map(|block| block.transactions.iter().map(|tx| tx.hash().to_string()))
            .collect();
        let mut known_blocks: HashSet<(u64, String)> = previous
            .iter()
            .map(|block| (block.height(), block.hash().to_string()))
            .collect();
        let mut new_operations = Vec::new();
        let mut new_blocks = Vec::new();

        let mut stable_blocks_written = 0;
        if boundary > checkpoint.stable_height {
            self.progress.set_stage(SyncStage::Stable);
            let range = ScanRange {
                from: checkpoint.stable_height + 1,
                to: boundary,
                anchor_hash: checkpoint.stable_hash.clone(),
                anchor_height: checkpoint.stable_height,
            };
            let report = self
                .scanner
                .scan(&range, &self.keychains, self.tiers.stable.as_ref())
                .await?;
            stable_blocks_written = report.blocks_written;
            new_operations.extend(report.operations.into_iter().filter(|op| seen.insert(op.clone())));
            new_blocks.extend(
                report
                    .written
                    .into_iter()
                    .filter(|b| known_blocks.insert((b.height, b.hash.clone()))),
            );

            if let Some(last) = self.tiers.stable.get_last_block_header()? {
                if last.height > checkpoint.stable_height {
                    checkpoint = Checkpoint::from_header(&last);
                }
            }
        }

        // The unstable window is rebuilt aside and only replaces the stored
        // one once the whole pass succeeded.
        self.progress.set_stage(SyncStage::Unstable);
        let staging = InMemoryBlockStore::<N::Transaction>::new();
        let range = ScanRange {
            from: boundary.max(checkpoint.stable_height) + 1,
            to: tip.height,
            anchor_hash: checkpoint.stable_hash.clone(),
            anchor_height: checkpoint.stable_height,
        };
        let report = self.scanner.scan(&range, &self.keychains, &staging).await?;

        self.tiers.unstable.clear()?;
        for block in staging.get_all_blocks()? {
            self.tiers.unstable.add_block(&block)?;
        }
        new_operations.extend(report.operations.into_iter().filter(|op| seen.insert(op.clone())));
        new_blocks.extend(
            report
                .written
                .into_iter()
                .filter(|b| known_blocks.insert((b.height, b.hash.clone()))),
        );

        self.tiers.checkpoint.save(&checkpoint)?;
        tracing::info!(
            "{}: checkpoint at {} ({})",
            N::NAME,
            checkpoint.stable_height,
            checkpoint.stable_hash
        );

        Ok(SyncReport {
            new_operations,
            new_blocks,
            last_block: tip,
            checkpoint,
            stable_blocks_written,
            unstable_blocks_written: report.blocks_written,
        })
    }

    /// Confirm the checkpoint is on the explorer's chain, rolling back the
    /// stable tier to the highest block it still confirms otherwise
    async fn verify_checkpoint(&self, checkpoint: Checkpoint, tip: &BlockHeader) -> Result<Checkpoint> {
        if tip.height < checkpoint.stable_height {
            return Err(Error::CheckpointDiverged(format!(
                "explorer tip {} is below checkpoint {}",
                tip.height, checkpoint.stable_height
            )));
        }

        if let Some(remote) = self.explorer.get_block(checkpoint.stable_height).await? {
            if remote.hash == checkpoint.stable_hash {
                return Ok(checkpoint);
            }
        }

        tracing::warn!(
            "{}: checkpoint {} ({}) no longer on the explorer's chain",
            N::NAME,
            checkpoint.stable_height,
            checkpoint.stable_hash
        );

        let stored = self
            .tiers
            .stable
            .get_blocks(0, checkpoint.stable_height - 1)?;
        let mut target = Checkpoint::genesis(&self.config.genesis_block_hash);
        for block in stored.iter().rev() {
            let confirmed = self
                .explorer
                .get_block(block.height())
                .await?
                .is_some_and(|remote| remote.hash == block.header.hash);
            if confirmed {
                target = Checkpoint::from_header(&block.header);
                break;
            }
        }

        let removed = self
            .tiers
            .stable
            .remove_blocks_from(target.stable_height + 1)?;
        self.tiers.checkpoint.save(&target)?;
        tracing::warn!(
            "{}: rolled back {} stable blocks, checkpoint now {}",
            N::NAME,
            removed,
            target.stable_height
        );
        self.events.publish(SyncEvent::CheckpointRolledBack {
            from_height: checkpoint.stable_height,
            to_height: target.stable_height,
        });
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explorer::{FixtureExplorer, FixtureLedger};
    use chainsync_core::{
        BitcoinLikeNetwork, BitcoinLikeTransaction, DerivedKeychain, KeychainChain,
        SequentialDeriver,
    };

    fn header(height: u64) -> BlockHeader {
        BlockHeader::new(height, format!("block {}", height), height as i64)
    }

    fn ledger(tip: u64) -> FixtureLedger<BitcoinLikeTransaction> {
        (1..=tip).fold(FixtureLedger::new().with_genesis_hash("genesis"), |l, h| {
            l.with_block(header(h))
        })
    }

    fn synchronizer(
        explorer: Arc<FixtureExplorer<BitcoinLikeNetwork>>,
        window: u64,
    ) -> AccountSynchronizer<BitcoinLikeNetwork> {
        let config = SynchronizerConfiguration::default()
            .with_max_possible_unstable_blocks(window)
            .with_gap_size(3)
            .with_genesis_block_hash("genesis");
        let keychain: Arc<dyn AddressSpace> = Arc::new(DerivedKeychain::new(
            SequentialDeriver::new(0),
            KeychainChain::Receive,
        ));
        AccountSynchronizer::new(config, explorer, vec![keychain], TierStore::in_memory()).unwrap()
    }

    #[test]
    fn test_rejects_empty_keychains() {
        let explorer = Arc::new(FixtureExplorer::<BitcoinLikeNetwork>::new(ledger(1)));
        let result = AccountSynchronizer::new(
            SynchronizerConfiguration::default(),
            explorer,
            Vec::new(),
            TierStore::in_memory(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_splits_stable_and_unstable() {
        let ledger = ledger(10)
            .with_transaction(BitcoinLikeTransaction::new("a").in_block(header(3)).with_output("0", 1))
            .with_transaction(BitcoinLikeTransaction::new("b").in_block(header(9)).with_output("1", 1));
        let explorer = Arc::new(FixtureExplorer::new(ledger));
        let sync = synchronizer(explorer, 4);

        let report = sync.synchronize().await.unwrap();
        assert_eq!(report.new_operations, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(report.last_block.height, 10);
        assert_eq!(report.checkpoint, Checkpoint::from_header(&header(3)));
        assert_eq!(report.stable_blocks_written, 1);
        assert_eq!(report.unstable_blocks_written, 1);
        assert_eq!(sync.progress().stage(), SyncStage::Complete);
        assert!(!sync.is_synchronizing());
    }

    #[tokio::test]
    async fn test_unstable_operation_reported_once() {
        let ledger = ledger(5)
            .with_transaction(BitcoinLikeTransaction::new("u").in_block(header(4)).with_output("0", 1));
        let explorer = Arc::new(FixtureExplorer::<BitcoinLikeNetwork>::new(ledger.clone()));
        let sync = synchronizer(Arc::clone(&explorer), 2);

        assert_eq!(sync.synchronize().await.unwrap().new_operation_count(), 1);

        // Height 4 becomes stable once the chain grows
        explorer.replace_ledger(ledger.with_block(header(6)).with_block(header(7)));
        let report = sync.synchronize().await.unwrap();
        assert_eq!(report.new_operation_count(), 0);
        assert_eq!(report.checkpoint.stable_height, 4);
        assert_eq!(report.stable_blocks_written, 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_idle() {
        let explorer = Arc::new(FixtureExplorer::<BitcoinLikeNetwork>::new(ledger(3)));
        explorer.set_failing(true);
        let sync = synchronizer(Arc::clone(&explorer), 1);

        let err = sync.synchronize().await.unwrap_err();
        assert!(matches!(err, Error::RemoteQuery(_)));
        assert!(err.is_retryable());
        assert_eq!(sync.progress().stage(), SyncStage::Idle);
        assert!(!sync.is_synchronizing());

        explorer.set_failing(false);
        sync.synchronize().await.unwrap();
    }
}
