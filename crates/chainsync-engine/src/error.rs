//! Error types for sync operations

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types.
///
/// Cloneable so a single cycle failure can be handed to every caller that
/// joined the cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Explorer request failed
    #[error("Remote query error: {0}")]
    RemoteQuery(String),

    /// Explorer does not know the requested block
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    /// Truncated page that cannot be continued
    #[error("Unsupported truncation: explorer page for height {height} holds a single incomplete block")]
    UnsupportedTruncation {
        /// Highest height in the offending page
        height: u64,
    },

    /// Internal protocol error (double finalize, late transaction)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Checkpoint could not be confirmed against the explorer
    #[error("Checkpoint diverged: {0}")]
    CheckpointDiverged(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Spawned task failed to complete
    #[error("Task error: {0}")]
    Task(String),
}

impl Error {
    /// Whether re-running the cycle may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RemoteQuery(_) | Error::BlockNotFound(_) | Error::CheckpointDiverged(_)
        )
    }

    /// Short category name for logs and events
    pub fn category(&self) -> &'static str {
        match self {
            Error::RemoteQuery(_) => "remote_query",
            Error::BlockNotFound(_) => "block_not_found",
            Error::UnsupportedTruncation { .. } => "unsupported_truncation",
            Error::InvariantViolation(_) => "invariant_violation",
            Error::Storage(_) => "storage",
            Error::CheckpointDiverged(_) => "checkpoint_diverged",
            Error::Config(_) => "config",
            Error::Task(_) => "task",
        }
    }
}

impl From<chainsync_core::Error> for Error {
    fn from(e: chainsync_core::Error) -> Self {
        match e {
            chainsync_core::Error::InvalidRange(msg) => Error::InvariantViolation(msg),
            chainsync_core::Error::Storage(msg) => Error::Storage(msg),
            other => Error::Storage(other.to_string()),
        }
    }
}

impl From<chainsync_params::Error> for Error {
    fn from(e: chainsync_params::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task(e.to_string())
    }
}
