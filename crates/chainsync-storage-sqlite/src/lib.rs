//! SQLite storage for chainsync
//!
//! Provides the stable and unstable block tiers and the synchronization
//! checkpoint on top of one WAL-mode database with versioned migrations.
//!
//! ## Tables
//!
//! - `stable_blocks`: append-only history below the reorg-safety boundary
//! - `unstable_blocks`: trailing window, cleared and rebuilt every cycle
//! - `sync_state`: single-row checkpoint
//! - `schema_version`: applied migrations

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod blocks;
pub mod database;
pub mod error;
pub mod migrations;
pub mod sync_state;

pub use blocks::{SqliteBlockStore, Tier};
pub use database::Database;
pub use error::{Error, Result};
pub use sync_state::{SqliteCheckpointStore, SyncStateRow};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Both block tiers and the checkpoint store over one database
pub struct SqliteTierStore<T> {
    /// Stable tier
    pub stable: Arc<SqliteBlockStore<T>>,
    /// Unstable tier
    pub unstable: Arc<SqliteBlockStore<T>>,
    /// Checkpoint store
    pub checkpoint: Arc<SqliteCheckpointStore>,
}

impl<T> SqliteTierStore<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Arc::new(Database::open(path)?);
        Ok(Self::from_database(db))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Arc::new(Database::open_in_memory()?)))
    }

    /// Build stores sharing an open database
    pub fn from_database(db: Arc<Database>) -> Self {
        Self {
            stable: Arc::new(SqliteBlockStore::new(Arc::clone(&db), Tier::Stable)),
            unstable: Arc::new(SqliteBlockStore::new(Arc::clone(&db), Tier::Unstable)),
            checkpoint: Arc::new(SqliteCheckpointStore::new(db)),
        }
    }
}
