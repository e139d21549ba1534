//! Discovery configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for discovery rounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Time to wait between rounds when there is nobody new to contact
    pub pause_interval: Duration,
    /// Timeout for a single peer exchange request
    pub request_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            pause_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
        }
    }
}
