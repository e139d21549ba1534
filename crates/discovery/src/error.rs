//! Error types for discovery

use std::net::SocketAddr;

use group0_storage::StorageError;
use thiserror::Error;

/// Result type for discovery operations
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors that can occur during discovery
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Persisting or loading peers failed
    #[error("Discovery storage error: {0}")]
    Storage(#[from] StorageError),

    /// No handler is listening at the peer's address
    #[error("Peer {0} is unreachable")]
    Unreachable(SocketAddr),

    /// The peer did not answer in time
    #[error("Peer exchange with {0} timed out")]
    Timeout(SocketAddr),

    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Discovery was cancelled
    #[error("Discovery aborted")]
    Aborted,
}
