//! Stable and unstable block tiers

use crate::sync_state::{height_from_sql, height_to_sql, with_busy_retry};
use crate::{Database, Result};
use chainsync_core::{BlockHeader, BlockStore, FilledBlock};
use rusqlite::{params, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// Which tier a store writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Heights at or below the reorg-safety boundary
    Stable,
    /// Trailing window rebuilt every cycle
    Unstable,
}

impl Tier {
    /// Backing table
    pub const fn table(&self) -> &'static str {
        match self {
            Self::Stable => "stable_blocks",
            Self::Unstable => "unstable_blocks",
        }
    }
}

/// Block tier backed by a SQLite table.
///
/// Transactions are stored as a JSON array next to the header columns.
pub struct SqliteBlockStore<T> {
    db: Arc<Database>,
    tier: Tier,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for SqliteBlockStore<T> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            tier: self.tier,
            _marker: PhantomData,
        }
    }
}

impl<T> SqliteBlockStore<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create store for a tier
    pub fn new(db: Arc<Database>, tier: Tier) -> Self {
        Self {
            db,
            tier,
            _marker: PhantomData,
        }
    }

    /// Tier this store writes to
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Number of stored blocks
    pub fn count(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.tier.table());
        let count: i64 = with_busy_retry(|| Ok(self.db.conn().query_row(&sql, [], |row| row.get(0))?))?;
        height_from_sql(count)
    }

    fn insert(&self, block: &FilledBlock<T>) -> Result<bool> {
        let transactions = serde_json::to_string(&block.transactions)?;
        let height = height_to_sql(block.height())?;
        let sql = format!(
            "INSERT OR IGNORE INTO {} (height, hash, timestamp, transactions) VALUES (?1, ?2, ?3, ?4)",
            self.tier.table()
        );

        let inserted = with_busy_retry(|| {
            self.db.transaction(|tx| {
                Ok(tx.execute(
                    &sql,
                    params![height, block.header.hash, block.header.timestamp, transactions],
                )?)
            })
        })?;

        if inserted == 0 {
            tracing::debug!(
                "{} tier already holds height {}, ignored",
                self.tier.table(),
                block.height()
            );
        }
        Ok(inserted > 0)
    }

    fn delete_where(&self, predicate: &str, height: u64) -> Result<usize> {
        let sql = format!("DELETE FROM {} WHERE {}", self.tier.table(), predicate);
        let height = height_to_sql(height)?;
        with_busy_retry(|| Ok(self.db.conn().execute(&sql, [height])?))
    }

    fn select_range(&self, from: u64, to: u64) -> Result<Vec<FilledBlock<T>>> {
        let from = height_to_sql(from)?;
        let to = i64::try_from(to).unwrap_or(i64::MAX);
        let sql = format!(
            "SELECT height, hash, timestamp, transactions FROM {}
             WHERE height >= ?1 AND height <= ?2 ORDER BY height ASC",
            self.tier.table()
        );

        let rows = with_busy_retry(|| {
            let conn = self.db.conn();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([from, to], read_raw_block)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(height, hash, timestamp, transactions)| {
                Ok(FilledBlock::new(
                    BlockHeader::new(height_from_sql(height)?, hash, timestamp),
                    serde_json::from_str(&transactions)?,
                ))
            })
            .collect()
    }

    fn select_last_header(&self) -> Result<Option<BlockHeader>> {
        let sql = format!(
            "SELECT height, hash, timestamp FROM {} ORDER BY height DESC LIMIT 1",
            self.tier.table()
        );
        let row = with_busy_retry(|| {
            Ok(self
                .db
                .conn()
                .query_row(&sql, [], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })
                .optional()?)
        })?;

        row.map(|(height, hash, timestamp)| {
            Ok(BlockHeader::new(height_from_sql(height)?, hash, timestamp))
        })
        .transpose()
    }
}

fn read_raw_block(row: &Row<'_>) -> rusqlite::Result<(i64, String, i64, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

impl<T> BlockStore<T> for SqliteBlockStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn add_block(&self, block: &FilledBlock<T>) -> chainsync_core::Result<bool> {
        Ok(self.insert(block)?)
    }

    fn remove_blocks_up_to(&self, height: u64) -> chainsync_core::Result<usize> {
        Ok(self.delete_where("height <= ?1", height)?)
    }

    fn remove_blocks_from(&self, height: u64) -> chainsync_core::Result<usize> {
        match i64::try_from(height) {
            Ok(_) => Ok(self.delete_where("height >= ?1", height)?),
            Err(_) => Ok(0),
        }
    }

    fn clear(&self) -> chainsync_core::Result<()> {
        let sql = format!("DELETE FROM {}", self.tier.table());
        with_busy_retry(|| Ok(self.db.conn().execute(&sql, [])?))?;
        Ok(())
    }

    fn get_blocks(&self, from: u64, to: u64) -> chainsync_core::Result<Vec<FilledBlock<T>>> {
        if from > to || i64::try_from(from).is_err() {
            return Ok(Vec::new());
        }
        Ok(self.select_range(from, to)?)
    }

    fn get_last_block_header(&self) -> chainsync_core::Result<Option<BlockHeader>> {
        Ok(self.select_last_header()?)
    }
}
