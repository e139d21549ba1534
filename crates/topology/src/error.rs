//! Simple error types for identity parsing

use thiserror::Error as ThisError;

/// Topology-related errors
#[derive(Clone, Debug, ThisError)]
pub enum TopologyError {
    /// Identifier could not be parsed
    #[error("Invalid identifier '{0}': {1}")]
    InvalidId(String, String),

    /// Address could not be parsed
    #[error("Invalid address '{0}'")]
    InvalidAddress(String),
}
