//! Transport seam for the peer exchange RPC

use std::sync::Arc;

use async_trait::async_trait;
use group0_topology::{DiscoveryPeer, PeerList};

use crate::{DiscoveryResult, PeerExchangeResponse};

/// Serves incoming peer exchange requests
#[async_trait]
pub trait PeerExchangeHandler: Send + Sync + 'static {
    /// Merge the sender's peer list and answer with local state
    async fn handle_peer_exchange(&self, peers: PeerList) -> DiscoveryResult<PeerExchangeResponse>;
}

/// Client and server side of the peer exchange RPC
#[async_trait]
pub trait PeerExchange: Send + Sync + 'static {
    /// Send our peer list to `target` and return its answer
    async fn peer_exchange(
        &self,
        target: &DiscoveryPeer,
        peers: PeerList,
    ) -> DiscoveryResult<PeerExchangeResponse>;

    /// Start serving requests addressed to this node
    async fn register_handler(&self, handler: Arc<dyn PeerExchangeHandler>)
    -> DiscoveryResult<()>;

    /// Stop serving requests
    async fn unregister_handler(&self) -> DiscoveryResult<()>;
}
