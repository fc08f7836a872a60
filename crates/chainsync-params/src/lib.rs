//! Chainsync configuration and network presets
//!
//! This crate provides the synchronizer configuration and the per-network
//! defaults (reorg window, gap limit, genesis anchor) it is built from.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod network;

pub use config::SynchronizerConfiguration;
pub use network::{NetworkPreset, NetworkType};

/// Error types for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid JSON
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, Error>;
