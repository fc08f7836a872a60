//! Per-height completion tracking for one scanner pass
//!
//! Every batch covering a height registers itself before it starts and
//! reports once it has delivered everything it will ever deliver for that
//! height. The report that drops the outstanding count to zero wins the
//! right to finalize the height; nobody else ever does.
//!
//! Each height is one atomic word: the low 31 bits count outstanding
//! batches and the top bit is a one-way "finished" latch.

use crate::{Error, Result};
use std::sync::atomic::{AtomicU32, Ordering};

const FINISHED: u32 = 1 << 31;
const OUTSTANDING_MASK: u32 = FINISHED - 1;

/// Completion tracker over a contiguous height range
pub struct HeightCompletionTracker {
    from: u64,
    slots: Box<[AtomicU32]>,
}

impl HeightCompletionTracker {
    /// Allocate slots for `[from, to]`
    pub fn new(from: u64, to: u64) -> Result<Self> {
        if to < from {
            return Err(Error::InvariantViolation(format!(
                "tracker range {}..={} is empty",
                from, to
            )));
        }
        let len = usize::try_from(to - from + 1).map_err(|_| {
            Error::InvariantViolation(format!("tracker range {}..={} too large", from, to))
        })?;
        let slots = (0..len).map(|_| AtomicU32::new(0)).collect();
        Ok(Self { from, slots })
    }

    /// First tracked height
    pub fn from_height(&self) -> u64 {
        self.from
    }

    /// Last tracked height
    pub fn to_height(&self) -> u64 {
        self.from + self.slots.len() as u64 - 1
    }

    fn slot(&self, height: u64) -> Result<&AtomicU32> {
        height
            .checked_sub(self.from)
            .and_then(|offset| usize::try_from(offset).ok())
            .and_then(|index| self.slots.get(index))
            .ok_or_else(|| {
                Error::InvariantViolation(format!(
                    "height {} outside tracked range {}..={}",
                    height,
                    self.from,
                    self.to_height()
                ))
            })
    }

    fn check_range(&self, from: u64, to: u64) -> Result<()> {
        if to < from {
            return Err(Error::InvariantViolation(format!(
                "batch range {}..={} is empty",
                from, to
            )));
        }
        self.slot(from)?;
        self.slot(to)?;
        Ok(())
    }

    /// Register one more batch covering `[from, to]`.
    ///
    /// Registering against an already finished height is a protocol error:
    /// the height has been finalized without this batch's data.
    pub fn add_batch(&self, from: u64, to: u64) -> Result<()> {
        self.check_range(from, to)?;
        for height in from..=to {
            let slot = self.slot(height)?;
            let mut current = slot.load(Ordering::Acquire);
            loop {
                if current & FINISHED != 0 {
                    return Err(Error::InvariantViolation(format!(
                        "batch registered for already finalized height {}",
                        height
                    )));
                }
                if current & OUTSTANDING_MASK == OUTSTANDING_MASK {
                    return Err(Error::InvariantViolation(format!(
                        "too many outstanding batches at height {}",
                        height
                    )));
                }
                match slot.compare_exchange_weak(
                    current,
                    current + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(actual) => current = actual,
                }
            }
        }
        Ok(())
    }

    /// Report one batch done with `height`.
    ///
    /// Returns `true` exactly once per height, on the report that brings the
    /// outstanding count to zero. Reports after that return `false`.
    pub fn finish_batch(&self, height: u64) -> Result<bool> {
        let slot = self.slot(height)?;
        let mut current = slot.load(Ordering::Acquire);
        loop {
            if current & FINISHED != 0 {
                tracing::warn!("finish reported for already finalized height {}", height);
                return Ok(false);
            }
            let outstanding = current & OUTSTANDING_MASK;
            if outstanding == 0 {
                return Err(Error::InvariantViolation(format!(
                    "finish reported for height {} with no outstanding batch",
                    height
                )));
            }
            let remaining = outstanding - 1;
            let next = if remaining == 0 { FINISHED } else { remaining };
            match slot.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(remaining == 0),
                Err(actual) => current = actual,
            }
        }
    }

    /// Report one batch done with every height of `[from, to]`.
    ///
    /// Returns the heights this call finalized, ascending.
    pub fn finish_range(&self, from: u64, to: u64) -> Result<Vec<u64>> {
        self.check_range(from, to)?;
        let mut finalized = Vec::new();
        for height in from..=to {
            if self.finish_batch(height)? {
                finalized.push(height);
            }
        }
        Ok(finalized)
    }

    /// Outstanding batch count at a height
    pub fn outstanding(&self, height: u64) -> Result<u32> {
        Ok(self.slot(height)?.load(Ordering::Acquire) & OUTSTANDING_MASK)
    }

    /// Whether a height has been finalized
    pub fn is_finished(&self, height: u64) -> Result<bool> {
        Ok(self.slot(height)?.load(Ordering::Acquire) & FINISHED != 0)
    }

    /// Number of heights not yet finalized
    pub fn unfinished_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.load(Ordering::Acquire) & FINISHED == 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_single_batch_finalizes() {
        let tracker = HeightCompletionTracker::new(10, 12).unwrap();
        tracker.add_batch(10, 12).unwrap();
        assert_eq!(tracker.outstanding(11).unwrap(), 1);

        assert_eq!(tracker.finish_range(10, 12).unwrap(), vec![10, 11, 12]);
        assert!(tracker.is_finished(11).unwrap());
        assert_eq!(tracker.unfinished_count(), 0);
    }

    #[test]
    fn test_last_reporter_wins() {
        let tracker = HeightCompletionTracker::new(1, 5).unwrap();
        tracker.add_batch(1, 5).unwrap();
        tracker.add_batch(3, 5).unwrap();

        // Heights below the second batch finish with the first report
        assert_eq!(tracker.finish_range(1, 5).unwrap(), vec![1, 2]);
        assert!(!tracker.is_finished(3).unwrap());
        assert_eq!(tracker.finish_range(3, 5).unwrap(), vec![3, 4, 5]);
    }

    #[test]
    fn test_late_finish_returns_false() {
        let tracker = HeightCompletionTracker::new(1, 1).unwrap();
        tracker.add_batch(1, 1).unwrap();
        assert!(tracker.finish_batch(1).unwrap());
        assert!(!tracker.finish_batch(1).unwrap());
    }

    #[test]
    fn test_protocol_errors() {
        let tracker = HeightCompletionTracker::new(5, 9).unwrap();
        assert!(matches!(
            tracker.finish_batch(5),
            Err(Error::InvariantViolation(_))
        ));
        assert!(tracker.add_batch(4, 6).is_err());
        assert!(tracker.add_batch(9, 10).is_err());
        assert!(tracker.add_batch(8, 7).is_err());
        assert!(tracker.outstanding(100).is_err());

        tracker.add_batch(5, 5).unwrap();
        tracker.finish_batch(5).unwrap();
        assert!(matches!(
            tracker.add_batch(5, 6),
            Err(Error::InvariantViolation(_))
        ));
        assert!(HeightCompletionTracker::new(3, 2).is_err());
    }

    #[test]
    fn test_threads_single_winner() {
        let tracker = Arc::new(HeightCompletionTracker::new(0, 63).unwrap());
        let batches = 16;
        for _ in 0..batches {
            tracker.add_batch(0, 63).unwrap();
        }

        let handles: Vec<_> = (0..batches)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || tracker.finish_range(0, 63).unwrap())
            })
            .collect();

        let mut winners: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        winners.sort_unstable();
        assert_eq!(winners, (0..=63).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn prop_finalized_once_after_all_reports(
            ranges in proptest::collection::vec((0u64..20, 0u64..20), 1..12)
        ) {
            let tracker = HeightCompletionTracker::new(0, 19).unwrap();
            let ranges: Vec<(u64, u64)> = ranges
                .into_iter()
                .map(|(a, b)| (a.min(b), a.max(b)))
                .collect();
            for &(from, to) in &ranges {
                tracker.add_batch(from, to).unwrap();
            }

            let mut wins = [0u32; 20];
            for (i, &(from, to)) in ranges.iter().enumerate() {
                for height in tracker.finish_range(from, to).unwrap() {
                    wins[height as usize] += 1;
                    // No report covering this height may still be pending
                    for &(later_from, later_to) in &ranges[i + 1..] {
                        prop_assert!(height < later_from || height > later_to);
                    }
                }
            }

            for height in 0..20u64 {
                let covered = ranges.iter().any(|&(f, t)| f <= height && height <= t);
                prop_assert_eq!(wins[height as usize], u32::from(covered));
            }
        }
    }
}
