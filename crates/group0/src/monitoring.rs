//! Group 0 status exported for monitoring

use std::sync::atomic::{AtomicU8, Ordering};

use prometheus::{IntGauge, Registry};

use crate::{Group0Error, Group0Result};

/// Coarse group 0 status. Observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitoringStatus {
    /// Consensus is disabled on this node
    Disabled = 0,
    /// Running normally
    Normal = 1,
    /// Shut down by `abort`
    Aborted = 2,
}

impl MonitoringStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disabled,
            2 => Self::Aborted,
            _ => Self::Normal,
        }
    }
}

/// Status gauge registered in a prometheus registry
pub struct Group0Metrics {
    status: AtomicU8,
    status_gauge: IntGauge,
}

impl Group0Metrics {
    /// Register the metrics in `registry`
    pub fn new(registry: &Registry) -> Group0Result<Self> {
        let status_gauge = IntGauge::new(
            "group0_status",
            "Group 0 status: 0 disabled, 1 normal, 2 aborted",
        )
        .map_err(|e| Group0Error::Metrics(e.to_string()))?;
        registry
            .register(Box::new(status_gauge.clone()))
            .map_err(|e| Group0Error::Metrics(e.to_string()))?;

        status_gauge.set(MonitoringStatus::Normal as i64);
        Ok(Self {
            status: AtomicU8::new(MonitoringStatus::Normal as u8),
            status_gauge,
        })
    }

    /// Current status
    pub fn status(&self) -> MonitoringStatus {
        MonitoringStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Record a new status
    pub fn set_status(&self, status: MonitoringStatus) {
        self.status.store(status as u8, Ordering::Release);
        self.status_gauge.set(status as i64);
    }
}

impl std::fmt::Debug for Group0Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group0Metrics")
            .field("status", &self.status())
            .finish()
    }
}
