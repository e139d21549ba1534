//! Services group 0 relies on but does not own

use std::net::SocketAddr;

use async_trait::async_trait;
use group0_topology::ServerId;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{Group0Error, Group0Result};

/// A cluster node as seen by gossip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GossipEndpoint {
    /// Address the node gossips from
    pub address: SocketAddr,
    /// The node's group 0 server id, once it has advertised one
    pub server_id: Option<ServerId>,
    /// Whether the failure detector considers the node alive
    pub alive: bool,
}

/// Gossip view of the cluster
#[async_trait]
pub trait Gossiper: Send + Sync + 'static {
    /// Address of this node
    fn local_address(&self) -> SocketAddr;

    /// Every known cluster node, this one included
    async fn endpoints(&self) -> Vec<GossipEndpoint>;
}

/// Pulls schema into group 0 during the upgrade
#[async_trait]
pub trait SchemaCoordinator: Send + Sync + 'static {
    /// Bring the local schema in line with the rest of the cluster
    async fn synchronize_schema(&self, abort: &CancellationToken) -> Group0Result<()>;
}

/// Cluster-wide feature gating the upgrade to group 0.
///
/// Backed by a watch channel owned by the feature negotiation service.
#[derive(Debug, Clone)]
pub struct RaftFeature {
    rx: watch::Receiver<bool>,
}

impl RaftFeature {
    /// Wrap a receiver
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Create a feature and the sender that enables it
    pub fn channel(enabled: bool) -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(enabled);
        (tx, Self { rx })
    }

    /// Whether the feature is enabled right now
    pub fn is_enabled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the feature is enabled
    pub async fn wait_enabled(&self) -> Group0Result<()> {
        let mut rx = self.rx.clone();
        rx.wait_for(|enabled| *enabled)
            .await
            .map(|_| ())
            .map_err(|_| Group0Error::Aborted)
    }
}
