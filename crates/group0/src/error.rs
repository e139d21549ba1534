//! Error types for group 0

use group0_discovery::DiscoveryError;
use group0_raft::RaftError;
use group0_storage::StorageError;
use thiserror::Error;

/// Result type for group 0 operations
pub type Group0Result<T> = Result<T, Group0Error>;

/// Errors returned by group 0 operations
#[derive(Debug, Error)]
pub enum Group0Error {
    /// The node is misconfigured; not recoverable by retrying
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The operation is not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Discovery failed
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Consensus engine error
    #[error(transparent)]
    Raft(#[from] RaftError),

    /// Storage error
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Schema synchronization failed
    #[error("Schema synchronization failed: {0}")]
    Schema(String),

    /// The upgrade to group 0 failed
    #[error("Upgrade to group 0 failed: {0}")]
    Upgrade(String),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// The operation was cancelled by `abort`
    #[error("Group 0 operation aborted")]
    Aborted,
}

impl Group0Error {
    /// Whether the error stems from cancellation, at any layer
    pub fn is_aborted(&self) -> bool {
        matches!(
            self,
            Group0Error::Aborted
                | Group0Error::Discovery(DiscoveryError::Aborted)
                | Group0Error::Raft(RaftError::Aborted)
        )
    }
}
