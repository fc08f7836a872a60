//! Completion tracking and buffering under a multi-threaded runtime

use chainsync_core::{BitcoinLikeTransaction, BlockHeader};
use chainsync_engine::{HeightCompletionTracker, PartialBlockBuffer};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_finisher_per_height() {
    const BATCHES: usize = 32;
    let tracker = Arc::new(HeightCompletionTracker::new(1, 50).unwrap());
    for _ in 0..BATCHES {
        tracker.add_batch(1, 50).unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..BATCHES {
        let tracker = Arc::clone(&tracker);
        tasks.push(tokio::spawn(async move {
            tokio::task::yield_now().await;
            tracker.finish_range(1, 50).unwrap()
        }));
    }

    let mut finished = Vec::new();
    for task in tasks {
        finished.extend(task.await.unwrap());
    }
    finished.sort_unstable();
    assert_eq!(finished, (1..=50).collect::<Vec<u64>>());
    assert_eq!(tracker.unfinished_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_buffer_collects_concurrent_appends() {
    let buffer = Arc::new(PartialBlockBuffer::<BitcoinLikeTransaction>::new());
    let mut tasks = Vec::new();
    for i in 0..40u64 {
        let buffer = Arc::clone(&buffer);
        tasks.push(tokio::spawn(async move {
            let height = i % 4;
            let tx = BitcoinLikeTransaction::new(format!("tx{:02}", i))
                .in_block(BlockHeader::new(height, format!("block {}", height), 0));
            buffer.append(height, vec![tx]).unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for height in 0..4 {
        let transactions = buffer.take_and_remove(height).unwrap();
        assert_eq!(transactions.len(), 10);
        assert!(transactions.windows(2).all(|w| w[0].hash < w[1].hash));
    }
    assert!(buffer.take_and_remove(0).is_err());
}
