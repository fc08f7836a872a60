//! Per-currency capability traits.
//!
//! The engine is written once against [`Network`] and instantiated for each
//! currency's concrete transaction type.

pub mod bitcoin;

use crate::{Address, BlockHeader};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// A transaction as returned by an explorer
pub trait ChainTransaction:
    Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Transaction hash (unique operation id)
    fn hash(&self) -> &str;

    /// Block containing the transaction, `None` while unconfirmed
    fn block(&self) -> Option<&BlockHeader>;

    /// Addresses receiving funds in this transaction
    fn output_addresses(&self) -> Vec<Address>;

    /// Addresses spending funds in this transaction
    fn input_addresses(&self) -> Vec<Address> {
        Vec::new()
    }

    /// Height of the containing block
    fn block_height(&self) -> Option<u64> {
        self.block().map(|b| b.height)
    }
}

/// Capability set of one currency family
pub trait Network: Send + Sync + 'static {
    /// Concrete transaction type
    type Transaction: ChainTransaction;

    /// Human-readable family name, used in logs
    const NAME: &'static str;
}
