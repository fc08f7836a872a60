//! Error types for chainsync core

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Invalid height or index range
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Requested item does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the failure came from a storage backend
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}
