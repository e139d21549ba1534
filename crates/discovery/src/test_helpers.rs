//! In-process peer exchange for tests
//!
//! Every node registers its handler in a shared [`MemoryNetwork`] under its
//! address. Requests are plain async calls into the target's handler.
//! Addresses can be isolated to simulate unreachable nodes.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use group0_topology::{DiscoveryPeer, PeerList};
use tracing::debug;

use crate::{DiscoveryError, DiscoveryResult, PeerExchange, PeerExchangeHandler, PeerExchangeResponse};

/// Shared routing table for in-memory peer exchange
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    handlers: Arc<DashMap<SocketAddr, Arc<dyn PeerExchangeHandler>>>,
    isolated: Arc<DashSet<SocketAddr>>,
}

impl MemoryNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport for the node listening at `local`
    pub fn transport(&self, local: SocketAddr) -> MemoryPeerExchange {
        MemoryPeerExchange {
            network: self.clone(),
            local,
        }
    }

    /// Drop every request to or from `address`
    pub fn isolate(&self, address: SocketAddr) {
        self.isolated.insert(address);
    }

    /// Undo [`MemoryNetwork::isolate`]
    pub fn heal(&self, address: SocketAddr) {
        self.isolated.remove(&address);
    }

    /// Whether a handler is registered at `address`
    pub fn is_registered(&self, address: &SocketAddr) -> bool {
        self.handlers.contains_key(address)
    }
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("handlers", &self.handlers.len())
            .field("isolated", &self.isolated.len())
            .finish()
    }
}

/// One node's view of a [`MemoryNetwork`]
#[derive(Debug, Clone)]
pub struct MemoryPeerExchange {
    network: MemoryNetwork,
    local: SocketAddr,
}

impl MemoryPeerExchange {
    /// Address this transport listens on
    pub fn local_address(&self) -> SocketAddr {
        self.local
    }
}

#[async_trait]
impl PeerExchange for MemoryPeerExchange {
    async fn peer_exchange(
        &self,
        target: &DiscoveryPeer,
        peers: PeerList,
    ) -> DiscoveryResult<PeerExchangeResponse> {
        if self.network.isolated.contains(&self.local)
            || self.network.isolated.contains(&target.address)
        {
            return Err(DiscoveryError::Unreachable(target.address));
        }

        // Clone the handler out so no map guard is held across the call
        let handler = self
            .network
            .handlers
            .get(&target.address)
            .map(|entry| entry.value().clone())
            .ok_or(DiscoveryError::Unreachable(target.address))?;

        debug!("Peer exchange {} -> {}", self.local, target);
        handler.handle_peer_exchange(peers).await
    }

    async fn register_handler(
        &self,
        handler: Arc<dyn PeerExchangeHandler>,
    ) -> DiscoveryResult<()> {
        if self.network.handlers.contains_key(&self.local) {
            return Err(DiscoveryError::Transport(format!(
                "a handler is already registered at {}",
                self.local
            )));
        }
        self.network.handlers.insert(self.local, handler);
        Ok(())
    }

    async fn unregister_handler(&self) -> DiscoveryResult<()> {
        self.network.handlers.remove(&self.local);
        Ok(())
    }
}
