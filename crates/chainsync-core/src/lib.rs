//! Chainsync core types
//!
//! Shared vocabulary of the synchronization engine: block headers and filled
//! blocks, the per-currency capability traits, the address space (keychain)
//! facade and the tier store interfaces.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod block;
pub mod error;
pub mod keychain;
pub mod network;
pub mod store;

pub use address::Address;
pub use block::{BlockHeader, Checkpoint, FilledBlock};
pub use error::{Error, Result};
pub use keychain::{
    AddressDeriver, AddressSpace, DerivedKeychain, HashDeriver, KeychainChain, SequentialDeriver,
    DEFAULT_GAP_LIMIT,
};
pub use network::bitcoin::{
    BitcoinLikeInput, BitcoinLikeNetwork, BitcoinLikeOutput, BitcoinLikeTransaction,
};
pub use network::{ChainTransaction, Network};
pub use store::{BlockStore, CheckpointStore, InMemoryBlockStore, InMemoryCheckpointStore};
