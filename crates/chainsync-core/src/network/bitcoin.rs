//! UTXO (Bitcoin-like) instantiation of the capability traits

use super::{ChainTransaction, Network};
use crate::{Address, BlockHeader};
use serde::{Deserialize, Serialize};

/// Bitcoin-like network family
#[derive(Debug, Clone, Copy, Default)]
pub struct BitcoinLikeNetwork;

impl Network for BitcoinLikeNetwork {
    type Transaction = BitcoinLikeTransaction;
    const NAME: &'static str = "bitcoin-like";
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinLikeInput {
    /// Spending address, if the explorer could resolve one
    pub address: Option<Address>,
    /// Spent value in base units
    pub value: u64,
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinLikeOutput {
    /// Receiving address, absent for non-standard scripts
    pub address: Option<Address>,
    /// Value in base units
    pub value: u64,
}

/// Bitcoin-like transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinLikeTransaction {
    /// Transaction hash
    pub hash: String,
    /// Containing block
    #[serde(default)]
    pub block: Option<BlockHeader>,
    /// Inputs
    #[serde(default)]
    pub inputs: Vec<BitcoinLikeInput>,
    /// Outputs
    #[serde(default)]
    pub outputs: Vec<BitcoinLikeOutput>,
    /// Fees in base units
    #[serde(default)]
    pub fees: u64,
}

impl BitcoinLikeTransaction {
    /// Create an empty unconfirmed transaction
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            block: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            fees: 0,
        }
    }

    /// Set containing block
    pub fn in_block(mut self, block: BlockHeader) -> Self {
        self.block = Some(block);
        self
    }

    /// Add an input
    pub fn with_input(mut self, address: impl Into<Address>, value: u64) -> Self {
        self.inputs.push(BitcoinLikeInput {
            address: Some(address.into()),
            value,
        });
        self
    }

    /// Add an output
    pub fn with_output(mut self, address: impl Into<Address>, value: u64) -> Self {
        self.outputs.push(BitcoinLikeOutput {
            address: Some(address.into()),
            value,
        });
        self
    }

    /// Total output value
    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }
}

impl ChainTransaction for BitcoinLikeTransaction {
    fn hash(&self) -> &str {
        &self.hash
    }

    fn block(&self) -> Option<&BlockHeader> {
        self.block.as_ref()
    }

    fn output_addresses(&self) -> Vec<Address> {
        self.outputs
            .iter()
            .filter_map(|o| o.address.clone())
            .collect()
    }

    fn input_addresses(&self) -> Vec<Address> {
        self.inputs.iter().filter_map(|i| i.address.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_addresses_skip_nonstandard() {
        let mut tx = BitcoinLikeTransaction::new("tx")
            .with_input("X", 0)
            .with_output("0", 10_000);
        tx.outputs.push(BitcoinLikeOutput {
            address: None,
            value: 1,
        });

        assert_eq!(tx.output_addresses(), vec![Address::from("0")]);
        assert_eq!(tx.input_addresses(), vec![Address::from("X")]);
        assert_eq!(tx.total_output(), 10_001);
        assert_eq!(tx.block_height(), None);
    }

    #[test]
    fn test_block_height() {
        let tx = BitcoinLikeTransaction::new("tx").in_block(BlockHeader::new(5, "b5", 0));
        assert_eq!(tx.block_height(), Some(5));
    }

    #[test]
    fn test_deserialize_minimal_json() {
        let tx: BitcoinLikeTransaction =
            serde_json::from_str(r#"{"hash":"abc","outputs":[{"address":"0","value":5}]}"#)
                .unwrap();
        assert_eq!(tx.hash, "abc");
        assert!(tx.block.is_none());
        assert_eq!(tx.outputs.len(), 1);
    }
}
