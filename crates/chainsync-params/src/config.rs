//! Synchronizer configuration

use crate::{Error, NetworkType, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of used addresses per scanner batch
pub const DEFAULT_BATCH_SIZE: u32 = 20;

/// Default explorer page size
pub const DEFAULT_MAX_TRANSACTIONS_PER_RESPONSE: usize = 1_000;

/// Default bound on in-flight explorer queries
pub const DEFAULT_MAX_CONCURRENT_QUERIES: usize = 8;

/// Account synchronizer configuration.
///
/// Immutable for the duration of a synchronization cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynchronizerConfiguration {
    /// Depth below the tip that may still be reorganized
    pub max_possible_unstable_blocks: u64,
    /// Used addresses per scanner batch
    pub batch_size: u32,
    /// Unused addresses scanned past the last used one
    pub gap_size: u32,
    /// Explorer page size; smaller truncated pages are logged
    pub max_transactions_per_response: usize,
    /// Hash anchoring the first synchronization
    pub genesis_block_hash: String,
    /// Bound on concurrent explorer queries
    pub max_concurrent_queries: usize,
    /// Confirm the checkpoint hash with the explorer before each cycle
    pub verify_checkpoint: bool,
}

impl Default for SynchronizerConfiguration {
    fn default() -> Self {
        Self::for_network(NetworkType::Mainnet)
    }
}

impl SynchronizerConfiguration {
    /// Defaults for a network
    pub fn for_network(network: NetworkType) -> Self {
        let preset = network.preset();
        Self {
            max_possible_unstable_blocks: preset.max_possible_unstable_blocks,
            batch_size: DEFAULT_BATCH_SIZE,
            gap_size: preset.gap_size,
            max_transactions_per_response: DEFAULT_MAX_TRANSACTIONS_PER_RESPONSE,
            genesis_block_hash: preset.genesis_block_hash.to_string(),
            max_concurrent_queries: DEFAULT_MAX_CONCURRENT_QUERIES,
            verify_checkpoint: true,
        }
    }

    /// Load from a JSON file; missing fields take mainnet defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Set unstable window depth
    pub fn with_max_possible_unstable_blocks(mut self, blocks: u64) -> Self {
        self.max_possible_unstable_blocks = blocks;
        self
    }

    /// Set batch size
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set gap size
    pub fn with_gap_size(mut self, gap_size: u32) -> Self {
        self.gap_size = gap_size;
        self
    }

    /// Set explorer page size
    pub fn with_max_transactions_per_response(mut self, max: usize) -> Self {
        self.max_transactions_per_response = max;
        self
    }

    /// Set genesis anchor hash
    pub fn with_genesis_block_hash(mut self, hash: impl Into<String>) -> Self {
        self.genesis_block_hash = hash.into();
        self
    }

    /// Set explorer concurrency bound
    pub fn with_max_concurrent_queries(mut self, max: usize) -> Self {
        self.max_concurrent_queries = max;
        self
    }

    /// Enable or disable checkpoint verification
    pub fn with_verify_checkpoint(mut self, verify: bool) -> Self {
        self.verify_checkpoint = verify;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_string()));
        }
        if self.gap_size == 0 {
            return Err(Error::InvalidConfig("gap_size must be > 0".to_string()));
        }
        if self.max_transactions_per_response == 0 {
            return Err(Error::InvalidConfig(
                "max_transactions_per_response must be > 0".to_string(),
            ));
        }
        if self.max_concurrent_queries == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_queries must be > 0".to_string(),
            ));
        }
        if self.genesis_block_hash.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "genesis_block_hash must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_mainnet() {
        let config = SynchronizerConfiguration::default();
        assert_eq!(
            config,
            SynchronizerConfiguration::for_network(NetworkType::Mainnet)
        );
        assert!(config.verify_checkpoint);
        config.validate().unwrap();
    }

    #[test]
    fn test_builder_and_validate() {
        let config = SynchronizerConfiguration::for_network(NetworkType::Regtest)
            .with_max_possible_unstable_blocks(1)
            .with_genesis_block_hash("block 1")
            .with_batch_size(2)
            .with_gap_size(3)
            .with_verify_checkpoint(false);
        assert_eq!(config.max_possible_unstable_blocks, 1);
        assert_eq!(config.genesis_block_hash, "block 1");
        config.validate().unwrap();

        assert!(config.clone().with_batch_size(0).validate().is_err());
        assert!(config.clone().with_gap_size(0).validate().is_err());
        assert!(config
            .clone()
            .with_max_transactions_per_response(0)
            .validate()
            .is_err());
        assert!(config.clone().with_max_concurrent_queries(0).validate().is_err());
        assert!(matches!(
            config.with_genesis_block_hash(" ").validate(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"max_possible_unstable_blocks": 3, "gap_size": 4, "genesis_block_hash": "g"}}"#
        )
        .unwrap();

        let config = SynchronizerConfiguration::from_json_file(file.path()).unwrap();
        assert_eq!(config.max_possible_unstable_blocks, 3);
        assert_eq!(config.gap_size, 4);
        assert_eq!(config.genesis_block_hash, "g");
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_from_json_file_errors() {
        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, "not json").unwrap();
        assert!(matches!(
            SynchronizerConfiguration::from_json_file(bad.path()),
            Err(Error::Parse(_))
        ));

        let mut invalid = tempfile::NamedTempFile::new().unwrap();
        write!(invalid, r#"{{"batch_size": 0}}"#).unwrap();
        assert!(matches!(
            SynchronizerConfiguration::from_json_file(invalid.path()),
            Err(Error::InvalidConfig(_))
        ));

        assert!(matches!(
            SynchronizerConfiguration::from_json_file("/nonexistent/chainsync.json"),
            Err(Error::Io(_))
        ));
    }
}
