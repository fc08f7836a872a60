//! Error types

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage error (generic)
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for chainsync_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Serialization(e) => chainsync_core::Error::Serialization(e.to_string()),
            Error::Storage(msg) => chainsync_core::Error::Storage(msg),
            other => chainsync_core::Error::Storage(other.to_string()),
        }
    }
}
