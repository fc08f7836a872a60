//! Concurrent batched address-range scanner
//!
//! A pass covers `[from, to]` for one or more keychains. Each keychain's
//! used addresses are split into batches of `batch_size`, plus one trailing
//! gap batch of `gap_size` unused addresses. Every batch queries the
//! explorer once; truncated pages spawn a continuation for the rest of the
//! range, and a gap batch that saw activity spawns the next gap window.
//!
//! All batches run as tasks in one `JoinSet`. The driver loop collects each
//! task's finalized blocks and follow-up batches, writes the blocks and
//! spawns the follow-ups, until the set drains.

use crate::buffer::PartialBlockBuffer;
use crate::explorer::{Explorer, TransactionBulk};
use crate::progress::SyncProgress;
use crate::tracker::HeightCompletionTracker;
use crate::{Error, Result};
use chainsync_core::{
    Address, AddressSpace, BlockHeader, BlockStore, ChainTransaction, FilledBlock, Network,
};
use chainsync_params::SynchronizerConfiguration;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Addresses queried together
#[derive(Debug, Clone)]
pub struct AddressBatch {
    /// Addresses, in derivation order
    pub addresses: Arc<[Address]>,
    /// Derivation index of the last address
    pub last_address_index: u32,
    /// Whether this is the trailing gap window
    pub is_gap: bool,
}

impl AddressBatch {
    fn derive(keychain: &dyn AddressSpace, start: u32, count: u32, is_gap: bool) -> Self {
        Self {
            addresses: keychain.addresses_in_range(start, count).into(),
            last_address_index: start + count - 1,
            is_gap,
        }
    }
}

/// Height range of one pass and the block hash its queries start from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRange {
    /// First height to finalize
    pub from: u64,
    /// Last height to finalize
    pub to: u64,
    /// Hash of a block at or below `from`
    pub anchor_hash: String,
    /// Height of `anchor_hash`
    pub anchor_height: u64,
}

impl ScanRange {
    /// Whether the range holds no heights
    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }
}

/// Outcome of a completed pass
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// Heights finalized
    pub heights_finalized: usize,
    /// Blocks newly inserted into the sink
    pub blocks_written: usize,
    /// Headers of newly inserted blocks, in write order
    pub written: Vec<BlockHeader>,
    /// Hashes of transactions in newly inserted blocks
    pub operations: Vec<String>,
    /// Highest inserted block
    pub highest_block: Option<BlockHeader>,
}

/// One batch over one sub-range
struct BatchJob {
    keychain: Arc<dyn AddressSpace>,
    batch: AddressBatch,
    from: u64,
    to: u64,
    anchor_hash: String,
    anchor_height: u64,
}

struct BatchOutcome<T> {
    finalized: Vec<u64>,
    blocks: Vec<FilledBlock<T>>,
    children: Vec<BatchJob>,
}

/// Shared run-state of one pass, cloned into every batch task
struct PassState<N: Network> {
    explorer: Arc<dyn Explorer<N>>,
    limiter: Arc<Semaphore>,
    keychains: Vec<Arc<dyn AddressSpace>>,
    tracker: HeightCompletionTracker,
    buffer: PartialBlockBuffer<N::Transaction>,
    progress: SyncProgress,
    gap_size: u32,
    max_transactions_per_response: usize,
}

/// Range scanner
pub struct RangeScanner<N: Network> {
    explorer: Arc<dyn Explorer<N>>,
    limiter: Arc<Semaphore>,
    batch_size: u32,
    gap_size: u32,
    max_transactions_per_response: usize,
    progress: SyncProgress,
}

impl<N: Network> RangeScanner<N> {
    /// Create scanner
    pub fn new(
        explorer: Arc<dyn Explorer<N>>,
        config: &SynchronizerConfiguration,
        progress: SyncProgress,
    ) -> Self {
        Self {
            explorer,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_queries.max(1))),
            batch_size: config.batch_size.max(1),
            gap_size: config.gap_size.max(1),
            max_transactions_per_response: config.max_transactions_per_response,
            progress,
        }
    }

    /// Scan `range` for every keychain, writing finalized blocks to `sink`
    pub async fn scan(
        &self,
        range: &ScanRange,
        keychains: &[Arc<dyn AddressSpace>],
        sink: &dyn BlockStore<N::Transaction>,
    ) -> Result<PassReport> {
        if range.is_empty() || keychains.is_empty() {
            return Ok(PassReport::default());
        }

        let state = Arc::new(PassState {
            explorer: Arc::clone(&self.explorer),
            limiter: Arc::clone(&self.limiter),
            keychains: keychains.to_vec(),
            tracker: HeightCompletionTracker::new(range.from, range.to)?,
            buffer: PartialBlockBuffer::new(),
            progress: self.progress.clone(),
            gap_size: self.gap_size,
            max_transactions_per_response: self.max_transactions_per_response,
        });

        let jobs: Vec<BatchJob> = keychains
            .iter()
            .flat_map(|keychain| self.initial_jobs(keychain, range))
            .collect();
        for job in &jobs {
            state.tracker.add_batch(job.from, job.to)?;
        }

        tracing::info!(
            "{}: scanning heights {}..={} with {} batches",
            N::NAME,
            range.from,
            range.to,
            jobs.len()
        );

        let mut join_set = JoinSet::new();
        for job in jobs {
            join_set.spawn(run_batch(Arc::clone(&state), job));
        }

        let mut report = PassReport::default();
        while let Some(joined) = join_set.join_next().await {
            let outcome = match joined.map_err(Error::from).and_then(|result| result) {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Siblings run to completion; their results are dropped
                    join_set.detach_all();
                    return Err(e);
                }
            };

            for child in outcome.children {
                join_set.spawn(run_batch(Arc::clone(&state), child));
            }

            self.progress.record_finalized(&outcome.finalized);
            report.heights_finalized += outcome.finalized.len();
            for block in outcome.blocks {
                if let Err(e) = self.write_block(sink, &block, &mut report) {
                    join_set.detach_all();
                    return Err(e);
                }
            }
        }

        let unfinished = state.tracker.unfinished_count();
        if unfinished > 0 {
            return Err(Error::InvariantViolation(format!(
                "{} heights in {}..={} never finalized",
                unfinished, range.from, range.to
            )));
        }

        tracing::info!(
            "{}: heights {}..={} done, {} blocks written",
            N::NAME,
            range.from,
            range.to,
            report.blocks_written
        );
        Ok(report)
    }

    fn initial_jobs(&self, keychain: &Arc<dyn AddressSpace>, range: &ScanRange) -> Vec<BatchJob> {
        let used = keychain.used_address_count();
        let mut jobs = Vec::new();

        let mut start = 0;
        while start < used {
            let count = self.batch_size.min(used - start);
            jobs.push(self.job(keychain, AddressBatch::derive(keychain.as_ref(), start, count, false), range));
            start += count;
        }
        jobs.push(self.job(
            keychain,
            AddressBatch::derive(keychain.as_ref(), used, self.gap_size, true),
            range,
        ));
        jobs
    }

    fn job(&self, keychain: &Arc<dyn AddressSpace>, batch: AddressBatch, range: &ScanRange) -> BatchJob {
        BatchJob {
            keychain: Arc::clone(keychain),
            batch,
            from: range.from,
            to: range.to,
            anchor_hash: range.anchor_hash.clone(),
            anchor_height: range.anchor_height,
        }
    }

    fn write_block(
        &self,
        sink: &dyn BlockStore<N::Transaction>,
        block: &FilledBlock<N::Transaction>,
        report: &mut PassReport,
    ) -> Result<()> {
        if !sink.add_block(block)? {
            return Ok(());
        }

        self.progress.record_block_written();
        report.blocks_written += 1;
        report.written.push(block.header.clone());
        report
            .operations
            .extend(block.transactions.iter().map(|tx| tx.hash().to_string()));
        if report
            .highest_block
            .as_ref()
            .map_or(true, |h| h.height < block.height())
        {
            report.highest_block = Some(block.header.clone());
        }
        Ok(())
    }
}

async fn run_batch<N: Network>(
    state: Arc<PassState<N>>,
    job: BatchJob,
) -> Result<BatchOutcome<N::Transaction>> {
    let bulk = {
        let _permit = state
            .limiter
            .acquire()
            .await
            .map_err(|e| Error::Task(e.to_string()))?;
        state.progress.record_query();
        state
            .explorer
            .get_transactions(&job.batch.addresses, &job.anchor_hash)
            .await?
    };

    tracing::debug!(
        "batch {}..={} ({} addresses, gap={}): {} transactions, truncated={}",
        job.from,
        job.to,
        job.batch.addresses.len(),
        job.batch.is_gap,
        bulk.transactions.len(),
        bulk.truncated
    );

    let children = if bulk.transactions.is_empty() {
        Vec::new()
    } else {
        route_transactions(&state, &job, bulk)?
    };

    // Children hold their heights before the parent lets go of them
    for child in &children {
        state.tracker.add_batch(child.from, child.to)?;
    }

    let finalized = state.tracker.finish_range(job.from, job.to)?;
    let mut blocks = Vec::new();
    for &height in &finalized {
        let transactions = state.buffer.take_and_remove(height)?;
        if let Some(block) = assemble_block(height, transactions)? {
            blocks.push(block);
        }
    }

    Ok(BatchOutcome {
        finalized,
        blocks,
        children,
    })
}

/// Buffer the complete part of a page and build follow-up batches
fn route_transactions<N: Network>(
    state: &PassState<N>,
    job: &BatchJob,
    bulk: TransactionBulk<N::Transaction>,
) -> Result<Vec<BatchJob>> {
    let mut children = Vec::new();
    let mut complete_to = job.to;

    if bulk.truncated {
        if bulk.transactions.len() < state.max_transactions_per_response {
            tracing::warn!(
                "explorer truncated a page of {} transactions (expected up to {})",
                bulk.transactions.len(),
                state.max_transactions_per_response
            );
        }

        let highest = bulk
            .transactions
            .iter()
            .filter_map(|tx| tx.block())
            .max_by_key(|b| b.height)
            .cloned()
            .ok_or_else(|| {
                Error::InvariantViolation("explorer returned unconfirmed transactions".to_string())
            })?;
        if highest.height <= job.anchor_height {
            return Err(Error::UnsupportedTruncation {
                height: highest.height,
            });
        }

        complete_to = complete_to.min(highest.height - 1);
        if highest.height <= job.to {
            children.push(BatchJob {
                keychain: Arc::clone(&job.keychain),
                batch: AddressBatch {
                    is_gap: false,
                    ..job.batch.clone()
                },
                from: highest.height.max(job.from),
                to: job.to,
                anchor_hash: highest.hash.clone(),
                anchor_height: highest.height,
            });
        }
    }

    let mut by_height: BTreeMap<u64, Vec<N::Transaction>> = BTreeMap::new();
    let mut lowest_in_range: Option<BlockHeader> = None;
    for tx in bulk.transactions {
        let height = match tx.block_height() {
            Some(height) => height,
            None => continue,
        };
        if height < job.from || height > job.to {
            continue;
        }
        if lowest_in_range
            .as_ref()
            .map_or(true, |lowest| height < lowest.height)
        {
            lowest_in_range = tx.block().cloned();
        }
        if height <= complete_to {
            by_height.entry(height).or_default().push(tx);
        }
    }

    for (height, transactions) in by_height {
        for tx in &transactions {
            for address in tx.output_addresses() {
                for keychain in &state.keychains {
                    keychain.mark_used(&address);
                }
            }
        }
        state.buffer.append(height, transactions)?;
    }

    if job.batch.is_gap {
        if let Some(lowest) = lowest_in_range {
            let next_start = job.batch.last_address_index + 1;
            tracing::debug!(
                "gap window {}..{} saw activity, extending from height {}",
                next_start,
                next_start + state.gap_size,
                lowest.height
            );
            children.push(BatchJob {
                keychain: Arc::clone(&job.keychain),
                batch: AddressBatch::derive(job.keychain.as_ref(), next_start, state.gap_size, true),
                from: lowest.height,
                to: job.to,
                anchor_hash: lowest.hash,
                anchor_height: lowest.height,
            });
        }
    }

    Ok(children)
}

/// Build the block for a finalized height; `None` when nothing was buffered
fn assemble_block<T: ChainTransaction>(
    height: u64,
    transactions: Vec<T>,
) -> Result<Option<FilledBlock<T>>> {
    let header = match transactions.first() {
        Some(first) => first.block().cloned().ok_or_else(|| {
            Error::InvariantViolation(format!("unconfirmed transaction buffered at {}", height))
        })?,
        None => return Ok(None),
    };
    if header.height != height {
        return Err(Error::InvariantViolation(format!(
            "transaction for height {} buffered at {}",
            header.height, height
        )));
    }
    if let Some(conflict) = transactions
        .iter()
        .filter_map(|tx| tx.block())
        .find(|block| block.hash != header.hash)
    {
        return Err(Error::InvariantViolation(format!(
            "height {} reported with block hashes {} and {}",
            height, header.hash, conflict.hash
        )));
    }
    Ok(Some(FilledBlock::new(header, transactions)))
}
