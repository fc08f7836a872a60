//! Network presets

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Mainnet
    Mainnet,
    /// Testnet
    Testnet,
    /// Regtest (local development)
    Regtest,
}

impl NetworkType {
    /// Lowercase name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }

    /// Synchronization defaults for this network
    pub const fn preset(&self) -> NetworkPreset {
        match self {
            Self::Mainnet => NetworkPreset::mainnet(),
            Self::Testnet => NetworkPreset::testnet(),
            Self::Regtest => NetworkPreset::regtest(),
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NetworkType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Self::Mainnet),
            "testnet" | "test" => Ok(Self::Testnet),
            "regtest" => Ok(Self::Regtest),
            other => Err(crate::Error::InvalidConfig(format!(
                "unknown network: {}",
                other
            ))),
        }
    }
}

/// Per-network synchronization defaults
#[derive(Debug, Clone, Copy)]
pub struct NetworkPreset {
    /// Network type
    pub network_type: NetworkType,
    /// Depth below the tip that may still be reorganized
    pub max_possible_unstable_blocks: u64,
    /// Gap limit for address discovery
    pub gap_size: u32,
    /// Hash anchoring the first synchronization
    pub genesis_block_hash: &'static str,
}

impl NetworkPreset {
    /// Mainnet defaults
    pub const fn mainnet() -> Self {
        Self {
            network_type: NetworkType::Mainnet,
            max_possible_unstable_blocks: 6,
            gap_size: 20,
            genesis_block_hash: "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
        }
    }

    /// Testnet defaults
    pub const fn testnet() -> Self {
        Self {
            network_type: NetworkType::Testnet,
            max_possible_unstable_blocks: 20,
            gap_size: 20,
            genesis_block_hash: "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943",
        }
    }

    /// Regtest defaults
    pub const fn regtest() -> Self {
        Self {
            network_type: NetworkType::Regtest,
            max_possible_unstable_blocks: 1,
            gap_size: 5,
            genesis_block_hash: "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206",
        }
    }
}
