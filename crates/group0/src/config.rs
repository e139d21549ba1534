//! Group 0 configuration

use std::time::Duration;

use group0_discovery::DiscoveryConfig;
use serde::{Deserialize, Serialize};

/// Configuration for [`crate::RaftGroup0`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Group0Config {
    /// Discovery rounds
    pub discovery: DiscoveryConfig,
    /// Retries of joins and configuration changes
    pub retry: RetryConfig,
    /// Legacy-to-group-0 upgrade
    pub upgrade: UpgradeConfig,
}

/// Backoff between retries of operations with an ambiguous outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for the delay
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Start a fresh backoff sequence
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_backoff,
            max: self.max_backoff,
        }
    }
}

/// Capped exponential backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    /// Delay to wait now; doubles the following one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next.min(self.max);
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

/// Configuration for the upgrade procedure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeConfig {
    /// How often to re-check that every cluster node is alive
    pub check_interval: Duration,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(1),
        }
    }
}
