//! CLI harness for exercising account synchronization
//!
//! Serves a JSON ledger through the fixture explorer and synchronizes a
//! receive/change keychain pair into a SQLite tier store. Useful for:
//! - Repeated cycles against a fixed ledger (idempotency)
//! - Reorg simulation by swapping the ledger between cycles
//! - Inspecting a database left behind by an earlier run

use anyhow::Context;
use chainsync_core::{
    AddressSpace, BitcoinLikeNetwork, BitcoinLikeTransaction, BlockStore, DerivedKeychain,
    HashDeriver, KeychainChain, SequentialDeriver,
};
use chainsync_engine::{AccountSynchronizer, FixtureExplorer, FixtureLedger, SyncEvent, TierStore};
use chainsync_params::{NetworkType, SynchronizerConfiguration};
use chainsync_storage_sqlite::SqliteTierStore;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Change addresses start here when derived sequentially
const SEQUENTIAL_CHANGE_OFFSET: u32 = 1_000_000;

#[derive(Parser)]
#[command(name = "sync-harness")]
#[command(about = "Account synchronization testing harness", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize an account against a JSON ledger
    Sync {
        /// Ledger served by the fixture explorer
        #[arg(short, long)]
        ledger: PathBuf,

        /// SQLite database holding the tiers and checkpoint
        #[arg(short, long)]
        db: PathBuf,

        /// Synchronizer configuration (JSON); defaults to the network preset
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Network preset used without a configuration file
        #[arg(short, long, default_value = "regtest")]
        network: NetworkType,

        /// Derive hashed addresses from this account key instead of "0", "1", ...
        #[arg(short, long)]
        account: Option<String>,

        /// Number of cycles to run
        #[arg(long, default_value = "1")]
        cycles: u32,

        /// Ledger to swap in after the first cycle (reorg simulation)
        #[arg(long)]
        reorg_ledger: Option<PathBuf>,
    },

    /// Print the tiers and checkpoint stored in a database
    Inspect {
        /// SQLite database
        #[arg(short, long)]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync {
            ledger,
            db,
            config,
            network,
            account,
            cycles,
            reorg_ledger,
        } => {
            run_sync(SyncArgs {
                ledger,
                db,
                config,
                network,
                account,
                cycles,
                reorg_ledger,
            })
            .await?;
        }
        Commands::Inspect { db } => {
            run_inspect(&db)?;
        }
    }

    Ok(())
}

struct SyncArgs {
    ledger: PathBuf,
    db: PathBuf,
    config: Option<PathBuf>,
    network: NetworkType,
    account: Option<String>,
    cycles: u32,
    reorg_ledger: Option<PathBuf>,
}

fn load_config(
    args: &SyncArgs,
    ledger: &FixtureLedger<BitcoinLikeTransaction>,
) -> anyhow::Result<SynchronizerConfiguration> {
    if let Some(path) = &args.config {
        return SynchronizerConfiguration::from_json_file(path)
            .with_context(|| format!("loading configuration {}", path.display()));
    }

    let mut config = SynchronizerConfiguration::for_network(args.network);
    if let Some(genesis) = &ledger.genesis_hash {
        config = config.with_genesis_block_hash(genesis.clone());
    }
    config.validate()?;
    Ok(config)
}

fn keychains(account: Option<&str>) -> Vec<Arc<dyn AddressSpace>> {
    match account {
        Some(key) => vec![
            Arc::new(DerivedKeychain::new(HashDeriver::new(key), KeychainChain::Receive)),
            Arc::new(DerivedKeychain::new(HashDeriver::new(key), KeychainChain::Change)),
        ],
        None => vec![
            Arc::new(DerivedKeychain::new(SequentialDeriver::new(0), KeychainChain::Receive)),
            Arc::new(DerivedKeychain::new(
                SequentialDeriver::new(SEQUENTIAL_CHANGE_OFFSET),
                KeychainChain::Change,
            )),
        ],
    }
}

async fn run_sync(args: SyncArgs) -> anyhow::Result<()> {
    let ledger = FixtureLedger::<BitcoinLikeTransaction>::from_json_file(&args.ledger)?;
    let config = load_config(&args, &ledger)?;
    info!("Ledger: {} ({} blocks)", args.ledger.display(), ledger.blocks.len());
    info!("Database: {}", args.db.display());

    let store = SqliteTierStore::<BitcoinLikeTransaction>::open(&args.db)
        .with_context(|| format!("opening {}", args.db.display()))?;
    let tiers = TierStore::new(
        store.stable.clone(),
        store.unstable.clone(),
        store.checkpoint.clone(),
    );
    let explorer = Arc::new(FixtureExplorer::<BitcoinLikeNetwork>::new(ledger));
    let synchronizer = AccountSynchronizer::new(
        config,
        explorer.clone(),
        keychains(args.account.as_deref()),
        tiers,
    )?;

    let mut events = synchronizer.subscribe();
    let event_task = tokio::spawn(async move {
        let mut operations = 0usize;
        loop {
            match events.recv().await {
                Ok(SyncEvent::NewOperation { uid }) => {
                    operations += 1;
                    info!("New operation {}", uid);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event listener lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        operations
    });

    for cycle in 1..=args.cycles.max(1) {
        if cycle == 2 {
            if let Some(path) = &args.reorg_ledger {
                info!("Swapping in ledger {}", path.display());
                explorer.replace_ledger(FixtureLedger::from_json_file(path)?);
            }
        }

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("[{elapsed_precise}] {spinner} cycle {prefix}: {msg}")?,
        );
        pb.set_prefix(cycle.to_string());

        let progress = synchronizer.progress();
        let pb_clone = pb.clone();
        let progress_task = tokio::spawn(async move {
            loop {
                pb_clone.set_message(progress.summary());
                pb_clone.tick();
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        });

        let result = synchronizer.synchronize().await;
        progress_task.abort();
        pb.finish_with_message(synchronizer.progress().summary());

        match result {
            Ok(report) => {
                info!(
                    "Cycle {}: tip {} | checkpoint {} ({}) | {} new operations | {} new blocks | {} stable / {} unstable blocks written",
                    cycle,
                    report.last_block.height,
                    report.checkpoint.stable_height,
                    report.checkpoint.stable_hash,
                    report.new_operation_count(),
                    report.new_blocks.len(),
                    report.stable_blocks_written,
                    report.unstable_blocks_written
                );
            }
            Err(e) if e.is_retryable() => {
                warn!("Cycle {} failed ({}), retryable: {}", cycle, e.category(), e);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("cycle {}", cycle));
            }
        }
    }

    drop(synchronizer);
    let operations = event_task.await?;
    info!("{} new operations across all cycles", operations);
    Ok(())
}

fn run_inspect(db: &Path) -> anyhow::Result<()> {
    let store = SqliteTierStore::<BitcoinLikeTransaction>::open(db)
        .with_context(|| format!("opening {}", db.display()))?;

    match store.checkpoint.load_sync_state()? {
        Some(state) => info!(
            "Checkpoint: {} ({}) updated {}",
            state.checkpoint.stable_height, state.checkpoint.stable_hash, state.updated_at
        ),
        None => info!("Checkpoint: none"),
    }

    for (name, tier) in [("stable", &store.stable), ("unstable", &store.unstable)] {
        let blocks = tier.get_all_blocks()?;
        info!("{} tier: {} blocks", name, blocks.len());
        for block in blocks {
            info!(
                "  {} {} ({} transactions)",
                block.header.height,
                block.header.hash,
                block.transactions.len()
            );
        }
    }

    Ok(())
}
