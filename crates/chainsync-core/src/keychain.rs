//! Address space (keychain) facade
//!
//! A keychain exposes a derived, extensible sequence of addresses for one
//! chain (receive or change) and tracks which of them have seen activity.
//! Derivation itself is pluggable through [`AddressDeriver`].

use crate::Address;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Default gap limit for address discovery
pub const DEFAULT_GAP_LIMIT: u32 = 20;

/// Which derivation chain a keychain walks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeychainChain {
    /// External (receive) addresses
    Receive,
    /// Internal (change) addresses
    Change,
}

impl KeychainChain {
    /// Derivation path component
    pub const fn index(&self) -> u32 {
        match self {
            Self::Receive => 0,
            Self::Change => 1,
        }
    }

    /// Display name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::Change => "change",
        }
    }
}

/// Address space consulted and mutated by the scanner
pub trait AddressSpace: Send + Sync {
    /// Number of addresses up to and including the highest used one
    fn used_address_count(&self) -> u32;

    /// Derive `count` addresses starting at `start`
    fn addresses_in_range(&self, start: u32, count: u32) -> Vec<Address>;

    /// Record activity on an address.
    ///
    /// Idempotent. Returns `true` if this call grew the used count.
    fn mark_used(&self, address: &Address) -> bool;
}

/// Deterministic address derivation
pub trait AddressDeriver: Send + Sync {
    /// Address at `index` on `chain`
    fn derive(&self, chain: KeychainChain, index: u32) -> Address;
}

/// Derives opaque addresses by hashing an account key with the path.
///
/// Stand-in for real BIP32 derivation; stable across runs for a given key.
#[derive(Debug, Clone)]
pub struct HashDeriver {
    account_key: String,
}

impl HashDeriver {
    /// Create deriver for an account key
    pub fn new(account_key: impl Into<String>) -> Self {
        Self {
            account_key: account_key.into(),
        }
    }
}

impl AddressDeriver for HashDeriver {
    fn derive(&self, chain: KeychainChain, index: u32) -> Address {
        let mut hasher = Sha256::new();
        hasher.update(self.account_key.as_bytes());
        hasher.update(chain.index().to_be_bytes());
        hasher.update(index.to_be_bytes());
        let digest = hasher.finalize();
        Address::new(format!("acct1{}", hex::encode(&digest[..20])))
    }
}

/// Derives the decimal string `offset + index`.
///
/// Handy for fixtures where the ledger names addresses by number.
#[derive(Debug, Clone, Copy)]
pub struct SequentialDeriver {
    offset: u32,
}

impl SequentialDeriver {
    /// Create deriver starting at `offset`
    pub const fn new(offset: u32) -> Self {
        Self { offset }
    }
}

impl AddressDeriver for SequentialDeriver {
    fn derive(&self, _chain: KeychainChain, index: u32) -> Address {
        Address::new(self.offset.saturating_add(index).to_string())
    }
}

/// Keychain over a deriver.
///
/// Usage marking is monotonic: the used count only grows, so concurrent
/// scanner tasks can mark addresses without coordinating.
pub struct DerivedKeychain<D> {
    deriver: D,
    chain: KeychainChain,
    used_count: AtomicU32,
    /// Reverse lookup for every address handed out so far
    derived: RwLock<HashMap<Address, u32>>,
}

impl<D: AddressDeriver> DerivedKeychain<D> {
    /// Create keychain with no used addresses
    pub fn new(deriver: D, chain: KeychainChain) -> Self {
        Self::with_used_count(deriver, chain, 0)
    }

    /// Create keychain restoring a previously known used count
    pub fn with_used_count(deriver: D, chain: KeychainChain, used_count: u32) -> Self {
        Self {
            deriver,
            chain,
            used_count: AtomicU32::new(used_count),
            derived: RwLock::new(HashMap::new()),
        }
    }

    /// Chain this keychain derives
    pub fn chain(&self) -> KeychainChain {
        self.chain
    }

    /// Index of an address previously returned by `addresses_in_range`
    pub fn index_of(&self, address: &Address) -> Option<u32> {
        self.derived.read().get(address).copied()
    }
}

impl<D: AddressDeriver> AddressSpace for DerivedKeychain<D> {
    fn used_address_count(&self) -> u32 {
        self.used_count.load(Ordering::Acquire)
    }

    fn addresses_in_range(&self, start: u32, count: u32) -> Vec<Address> {
        let end = start.saturating_add(count);
        let addresses: Vec<Address> = (start..end)
            .map(|index| self.deriver.derive(self.chain, index))
            .collect();

        let mut derived = self.derived.write();
        for (offset, address) in addresses.iter().enumerate() {
            derived.insert(address.clone(), start + offset as u32);
        }
        addresses
    }

    fn mark_used(&self, address: &Address) -> bool {
        let index = match self.index_of(address) {
            Some(index) => index,
            None => return false,
        };
        let previous = self
            .used_count
            .fetch_max(index.saturating_add(1), Ordering::AcqRel);
        if previous <= index {
            tracing::debug!(
                "{} keychain: address {} (index {}) marked used",
                self.chain.name(),
                address,
                index
            );
            true
        } else {
            false
        }
    }
}
