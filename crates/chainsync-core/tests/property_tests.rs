//! Property-based tests for chainsync-core
//!
//! Uses proptest to verify keychain and block store invariants across
//! randomized inputs

use chainsync_core::{
    AddressSpace, BlockHeader, BlockStore, DerivedKeychain, FilledBlock, HashDeriver,
    InMemoryBlockStore, KeychainChain,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

// ============================================================================
// Property Test Strategies
// ============================================================================

/// Generate an account key
fn account_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{1,32}").unwrap()
}

/// Generate a set of block heights
fn heights_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1u64..500, 0..60)
}

fn block(height: u64, tag: &str) -> FilledBlock<String> {
    FilledBlock::new(
        BlockHeader::new(height, format!("{} {}", tag, height), height as i64),
        vec![format!("tx {}", height)],
    )
}

// ============================================================================
// Keychain Properties
// ============================================================================

proptest! {
    /// Property: the used count ends one past the highest marked index
    #[test]
    fn prop_used_count_tracks_highest_mark(
        account in account_strategy(),
        marks in prop::collection::vec(0u32..40, 1..30)
    ) {
        let keychain = DerivedKeychain::new(HashDeriver::new(account), KeychainChain::Receive);
        let addresses = keychain.addresses_in_range(0, 40);

        for &index in &marks {
            keychain.mark_used(&addresses[index as usize]);
        }

        let highest = marks.iter().copied().max().unwrap();
        prop_assert_eq!(keychain.used_address_count(), highest + 1);
    }

    /// Property: overlapping ranges derive the same addresses
    #[test]
    fn prop_overlapping_ranges_agree(
        account in account_strategy(),
        start in 0u32..1_000,
        count in 1u32..50,
        shift in 0u32..50
    ) {
        let keychain = DerivedKeychain::new(HashDeriver::new(account), KeychainChain::Change);
        let wide = keychain.addresses_in_range(start, count + shift);
        let narrow = keychain.addresses_in_range(start + shift, count);

        prop_assert_eq!(&wide[shift as usize..], &narrow[..]);
        prop_assert_eq!(keychain.index_of(&narrow[0]), Some(start + shift));
    }
}

// ============================================================================
// Block Store Properties
// ============================================================================

proptest! {
    /// Property: first write wins and reads come back ascending
    #[test]
    fn prop_insert_or_ignore(heights in heights_strategy()) {
        let store = InMemoryBlockStore::new();
        let mut expected = BTreeSet::new();

        for &height in &heights {
            let inserted = store.add_block(&block(height, "first")).unwrap();
            prop_assert_eq!(inserted, expected.insert(height));
            prop_assert!(!store.add_block(&block(height, "second")).unwrap());
        }

        let stored = store.get_all_blocks().unwrap();
        let stored_heights: Vec<u64> = stored.iter().map(|b| b.height()).collect();
        prop_assert_eq!(stored_heights, expected.iter().copied().collect::<Vec<_>>());
        prop_assert!(stored.iter().all(|b| b.hash().starts_with("first")));
    }

    /// Property: truncating from a height leaves exactly the lower blocks
    #[test]
    fn prop_remove_from_splits_cleanly(heights in heights_strategy(), cut in 0u64..520) {
        let store = InMemoryBlockStore::new();
        for &height in &heights {
            store.add_block(&block(height, "block")).unwrap();
        }
        let unique: BTreeSet<u64> = heights.iter().copied().collect();

        let removed = store.remove_blocks_from(cut).unwrap();
        prop_assert_eq!(removed, unique.iter().filter(|&&h| h >= cut).count());
        prop_assert_eq!(
            store.get_last_block_header().unwrap().map(|h| h.height),
            unique.iter().copied().filter(|&h| h < cut).max()
        );
    }
}
