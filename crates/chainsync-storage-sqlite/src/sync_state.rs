//! Checkpoint storage with retry/backoff for SQLITE_BUSY
//!
//! The checkpoint is a single row; saving it replaces the previous one
//! atomically.

use crate::{Database, Error, Result};
use chainsync_core::{Checkpoint, CheckpointStore};
use rusqlite::{params, ErrorCode, OptionalExtension};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Maximum retry attempts for SQLITE_BUSY
pub const MAX_BUSY_RETRIES: u32 = 5;

/// Base backoff duration in milliseconds
pub const BASE_BACKOFF_MS: u64 = 50;

/// Maximum backoff duration in milliseconds
pub const MAX_BACKOFF_MS: u64 = 1000;

/// Checkpoint row as stored
#[derive(Debug, Clone)]
pub struct SyncStateRow {
    /// Checkpoint
    pub checkpoint: Checkpoint,
    /// Last update timestamp (RFC 3339)
    pub updated_at: String,
}

/// Checkpoint store backed by the `sync_state` table
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    db: Arc<Database>,
}

impl SqliteCheckpointStore {
    /// Create new checkpoint store
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Save checkpoint with retry on SQLITE_BUSY
    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let updated_at = chrono::Utc::now().to_rfc3339();
        with_busy_retry(|| {
            self.db.conn().execute(
                "INSERT INTO sync_state (id, stable_height, stable_hash, updated_at)
                 VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    stable_height = excluded.stable_height,
                    stable_hash = excluded.stable_hash,
                    updated_at = excluded.updated_at",
                params![
                    height_to_sql(checkpoint.stable_height)?,
                    checkpoint.stable_hash,
                    updated_at
                ],
            )?;
            Ok(())
        })?;

        tracing::debug!(
            "Saved checkpoint: height={}, hash={}",
            checkpoint.stable_height,
            checkpoint.stable_hash
        );
        Ok(())
    }

    /// Load checkpoint row with retry on SQLITE_BUSY
    pub fn load_sync_state(&self) -> Result<Option<SyncStateRow>> {
        with_busy_retry(|| {
            let row = self
                .db
                .conn()
                .query_row(
                    "SELECT stable_height, stable_hash, updated_at FROM sync_state WHERE id = 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(height, hash, updated_at)| {
                Ok(SyncStateRow {
                    checkpoint: Checkpoint {
                        stable_height: height_from_sql(height)?,
                        stable_hash: hash,
                    },
                    updated_at,
                })
            })
            .transpose()
        })
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn load(&self) -> chainsync_core::Result<Option<Checkpoint>> {
        Ok(self.load_sync_state()?.map(|row| row.checkpoint))
    }

    fn save(&self, checkpoint: &Checkpoint) -> chainsync_core::Result<()> {
        Ok(self.save_checkpoint(checkpoint)?)
    }
}

/// Execute with retry logic for SQLITE_BUSY
pub(crate) fn with_busy_retry<F, T>(mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempts = 0;

    loop {
        match f() {
            Ok(result) => return Ok(result),
            Err(Error::Database(ref e)) if is_busy_error(e) && attempts < MAX_BUSY_RETRIES => {
                attempts += 1;
                let backoff = calculate_backoff(attempts);
                tracing::debug!(
                    "SQLITE_BUSY (attempt {}/{}), retrying in {}ms",
                    attempts,
                    MAX_BUSY_RETRIES,
                    backoff
                );
                thread::sleep(Duration::from_millis(backoff));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Check if error is SQLITE_BUSY
fn is_busy_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: ErrorCode::DatabaseBusy,
                ..
            },
            _
        )
    )
}

/// Calculate exponential backoff with jitter
fn calculate_backoff(attempt: u32) -> u64 {
    let base = BASE_BACKOFF_MS * (1 << attempt.min(6));
    let jitter = rand::random::<u64>() % (base / 4 + 1);
    (base + jitter).min(MAX_BACKOFF_MS)
}

pub(crate) fn height_to_sql(height: u64) -> Result<i64> {
    i64::try_from(height).map_err(|_| Error::Storage(format!("height {} out of range", height)))
}

pub(crate) fn height_from_sql(height: i64) -> Result<u64> {
    u64::try_from(height).map_err(|_| Error::Storage(format!("negative height {}", height)))
}
