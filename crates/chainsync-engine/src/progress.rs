//! Sync progress tracking with pass counters

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sync stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    /// No cycle running
    Idle,
    /// Scanning the stable range
    Stable,
    /// Rebuilding the unstable window
    Unstable,
    /// Last cycle finished
    Complete,
}

impl SyncStage {
    /// Get display name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Stable => "Scanning Stable Range",
            Self::Unstable => "Rebuilding Unstable Window",
            Self::Complete => "Synced",
        }
    }
}

/// Counters snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Explorer queries issued
    pub queries: u64,
    /// Heights finalized
    pub heights_finalized: u64,
    /// Blocks written to a tier
    pub blocks_written: u64,
    /// Highest finalized height in the current pass
    pub current_height: u64,
    /// Tip height of the current cycle
    pub target_height: u64,
}

/// Sync progress
#[derive(Debug, Clone)]
pub struct SyncProgress {
    inner: Arc<RwLock<ProgressInner>>,
}

#[derive(Debug, Clone)]
struct ProgressInner {
    stage: SyncStage,
    current_height: u64,
    target_height: u64,
    start_time: Option<Instant>,
    queries: u64,
    heights_finalized: u64,
    blocks_written: u64,
}

impl SyncProgress {
    /// Create new progress tracker
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ProgressInner {
                stage: SyncStage::Idle,
                current_height: 0,
                target_height: 0,
                start_time: None,
                queries: 0,
                heights_finalized: 0,
                blocks_written: 0,
            })),
        }
    }

    /// Start tracking a cycle
    pub fn start(&self) {
        let mut inner = self.inner.write();
        inner.start_time = Some(Instant::now());
        inner.current_height = 0;
        inner.queries = 0;
        inner.heights_finalized = 0;
        inner.blocks_written = 0;
    }

    /// Set target height
    pub fn set_target(&self, height: u64) {
        self.inner.write().target_height = height;
    }

    /// Set stage
    pub fn set_stage(&self, stage: SyncStage) {
        self.inner.write().stage = stage;
    }

    /// Record an explorer query
    pub fn record_query(&self) {
        self.inner.write().queries += 1;
    }

    /// Record finalized heights
    pub fn record_finalized(&self, heights: &[u64]) {
        if heights.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        inner.heights_finalized += heights.len() as u64;
        if let Some(&max) = heights.iter().max() {
            inner.current_height = inner.current_height.max(max);
        }
    }

    /// Record a block written to a tier
    pub fn record_block_written(&self) {
        self.inner.write().blocks_written += 1;
    }

    /// Get current stage
    pub fn stage(&self) -> SyncStage {
        self.inner.read().stage
    }

    /// Get target height
    pub fn target_height(&self) -> u64 {
        self.inner.read().target_height
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Option<Duration> {
        self.inner.read().start_time.map(|start| start.elapsed())
    }

    /// Get counters snapshot
    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.inner.read();
        ProgressSnapshot {
            queries: inner.queries,
            heights_finalized: inner.heights_finalized,
            blocks_written: inner.blocks_written,
            current_height: inner.current_height,
            target_height: inner.target_height,
        }
    }

    /// Mark as complete
    pub fn complete(&self) {
        let mut inner = self.inner.write();
        inner.stage = SyncStage::Complete;
        inner.current_height = inner.target_height;
    }

    /// Mark as idle after a failed cycle
    pub fn reset(&self) {
        self.inner.write().stage = SyncStage::Idle;
    }

    /// Get summary string
    pub fn summary(&self) -> String {
        let inner = self.inner.read();
        let elapsed = inner
            .start_time
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        format!(
            "{} | {}/{} | {} queries | {} heights finalized | {} blocks written | {:.1}s",
            inner.stage.name(),
            inner.current_height,
            inner.target_height,
            inner.queries,
            inner.heights_finalized,
            inner.blocks_written,
            elapsed
        )
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_creation() {
        let progress = SyncProgress::new();
        assert_eq!(progress.stage(), SyncStage::Idle);
        assert_eq!(progress.snapshot(), ProgressSnapshot::default());
        assert!(progress.elapsed().is_none());
    }

    #[test]
    fn test_counters() {
        let progress = SyncProgress::new();
        progress.start();
        progress.set_target(100);
        progress.record_query();
        progress.record_query();
        progress.record_finalized(&[4, 9, 7]);
        progress.record_finalized(&[]);
        progress.record_block_written();

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.queries, 2);
        assert_eq!(snapshot.heights_finalized, 3);
        assert_eq!(snapshot.current_height, 9);
        assert_eq!(snapshot.blocks_written, 1);
    }

    #[test]
    fn test_completion() {
        let progress = SyncProgress::new();
        progress.set_target(100);
        progress.set_stage(SyncStage::Unstable);

        progress.complete();
        assert_eq!(progress.stage(), SyncStage::Complete);
        assert_eq!(progress.snapshot().current_height, 100);

        progress.reset();
        assert_eq!(progress.stage(), SyncStage::Idle);
    }

    #[test]
    fn test_summary_string() {
        let progress = SyncProgress::new();
        progress.set_target(1000);
        progress.start();
        progress.record_finalized(&[500]);

        let summary = progress.summary();
        assert!(summary.contains("500/1000"));
        assert!(summary.contains("Idle"));
    }
}
