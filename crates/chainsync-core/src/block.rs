//! Block headers, filled blocks and the synchronization checkpoint

use serde::{Deserialize, Serialize};

/// Block header as seen by the wallet
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height
    pub height: u64,
    /// Block hash
    pub hash: String,
    /// Block time (unix seconds)
    pub timestamp: i64,
}

impl BlockHeader {
    /// Create new header
    pub fn new(height: u64, hash: impl Into<String>, timestamp: i64) -> Self {
        Self {
            height,
            hash: hash.into(),
            timestamp,
        }
    }
}

/// A finalized block: its header plus every account transaction found in it.
///
/// Produced exactly once per height by the scanner and never mutated after
/// it has been handed to a tier store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilledBlock<T> {
    /// Block header
    pub header: BlockHeader,
    /// Account transactions, ordered by hash
    pub transactions: Vec<T>,
}

impl<T> FilledBlock<T> {
    /// Create new filled block
    pub fn new(header: BlockHeader, transactions: Vec<T>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Block height
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Block hash
    pub fn hash(&self) -> &str {
        &self.header.hash
    }
}

/// Durable record of stable synchronization progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Height of the last block durably written to the stable tier
    pub stable_height: u64,
    /// Hash of that block (or the genesis anchor)
    pub stable_hash: String,
}

impl Checkpoint {
    /// Anchor used before any stable block has been written
    pub fn genesis(genesis_block_hash: impl Into<String>) -> Self {
        Self {
            stable_height: 0,
            stable_hash: genesis_block_hash.into(),
        }
    }

    /// Checkpoint pointing at a written block
    pub fn from_header(header: &BlockHeader) -> Self {
        Self {
            stable_height: header.height,
            stable_hash: header.hash.clone(),
        }
    }

    /// Whether this is the genesis anchor rather than a written block
    pub fn is_genesis(&self) -> bool {
        self.stable_height == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_from_header() {
        let header = BlockHeader::new(42, "abc", 1_700_000_000);
        let checkpoint = Checkpoint::from_header(&header);
        assert_eq!(checkpoint.stable_height, 42);
        assert_eq!(checkpoint.stable_hash, "abc");
        assert!(!checkpoint.is_genesis());
        assert!(Checkpoint::genesis("block 1").is_genesis());
    }

    #[test]
    fn test_filled_block_serde() {
        let block = FilledBlock::new(BlockHeader::new(7, "h7", 0), vec!["tx".to_string()]);
        let json = serde_json::to_string(&block).unwrap();
        let decoded: FilledBlock<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.height(), 7);
        assert_eq!(decoded.hash(), "h7");
    }
}
