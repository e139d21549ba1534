//! Group 0: the cluster-wide consensus group
//!
//! Every node of the cluster belongs to group 0, which replicates schema and
//! topology changes. This crate brings a node into the group and manages its
//! membership:
//! - bootstrap: discover peers, then create or join group 0
//! - restart: resume the server of the group whose id is on disk
//! - membership: promote, demote and remove members, leave the group
//! - upgrade: move clusters bootstrapped before group 0 existed onto it

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Services group 0 depends on
pub mod collaborators;

/// Configuration types
pub mod config;

/// Error types
pub mod error;

/// Lifecycle and setup
pub mod group0;

/// Configuration changes
pub mod membership;

/// Status gauge
pub mod monitoring;

/// Upgrade of legacy clusters
pub mod upgrade;

pub use collaborators::{GossipEndpoint, Gossiper, RaftFeature, SchemaCoordinator};
pub use config::{Backoff, Group0Config, RetryConfig, UpgradeConfig};
pub use error::{Group0Error, Group0Result};
pub use group0::{Group0Phase, RaftGroup0, RaftGroup0Options};
pub use monitoring::{Group0Metrics, MonitoringStatus};
pub use upgrade::UpgradeStatus;
