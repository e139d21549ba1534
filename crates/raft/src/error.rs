//! Error types for consensus operations

use group0_topology::{GroupId, ServerId};
use thiserror::Error;

/// Result type for consensus operations
pub type RaftResult<T> = Result<T, RaftError>;

/// Errors returned by the consensus engine
#[derive(Debug, Clone, Error)]
pub enum RaftError {
    /// The entry may or may not have been committed
    #[error("Commit status of the entry is unknown")]
    CommitStatusUnknown,

    /// The contacted server is not the leader
    #[error("Not a leader (leader hint: {0:?})")]
    NotALeader(Option<ServerId>),

    /// The change was refused
    #[error("Configuration change rejected: {0}")]
    Rejected(String),

    /// No such group
    #[error("Group {0} not found")]
    GroupNotFound(GroupId),

    /// The operation or the server was aborted
    #[error("Consensus operation aborted")]
    Aborted,

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Any other error
    #[error("{0}")]
    Other(String),
}

impl RaftError {
    /// Whether retrying the same operation may succeed
    pub fn is_commit_unknown(&self) -> bool {
        matches!(self, RaftError::CommitStatusUnknown)
    }
}
