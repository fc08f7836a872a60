//! Account synchronization engine
//!
//! Reconciles an account's view of the chain with a remote explorer:
//! concurrent batched address queries, per-height completion tracking,
//! gap-limit address discovery and a stable/unstable tier split that
//! absorbs reorganizations near the tip.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::result_large_err)]

pub mod buffer;
pub mod error;
pub mod events;
pub mod explorer;
pub mod progress;
pub mod scanner;
pub mod synchronizer;
pub mod tier;
pub mod tracker;

pub use buffer::PartialBlockBuffer;
pub use error::{Error, Result};
pub use events::{EventPublisher, SyncEvent, EVENT_CHANNEL_CAPACITY};
pub use explorer::{Explorer, FixtureExplorer, FixtureLedger, RecordedQuery, TransactionBulk};
pub use progress::{ProgressSnapshot, SyncProgress, SyncStage};
pub use scanner::{AddressBatch, PassReport, RangeScanner, ScanRange};
pub use synchronizer::{AccountSynchronizer, SyncReport};
pub use tier::{stable_boundary, TierStore};
pub use tracker::HeightCompletionTracker;
