//! Server id to address mapping

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::ServerId;

/// Maps group 0 server ids to the addresses they can be reached at.
///
/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct AddressMap {
    entries: Arc<RwLock<HashMap<ServerId, SocketAddr>>>,
}

impl AddressMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the address of a server
    pub fn add_or_update(&self, id: ServerId, address: SocketAddr) {
        if id.is_nil() {
            return;
        }
        let previous = self.entries.write().insert(id, address);
        if previous != Some(address) {
            debug!("Address map: {} -> {}", id, address);
        }
    }

    /// Look up a server's address
    pub fn find(&self, id: &ServerId) -> Option<SocketAddr> {
        self.entries.read().get(id).copied()
    }

    /// Reverse lookup
    pub fn find_by_address(&self, address: &SocketAddr) -> Option<ServerId> {
        self.entries
            .read()
            .iter()
            .find_map(|(id, addr)| (addr == address).then_some(*id))
    }

    /// Forget a server
    pub fn remove(&self, id: &ServerId) -> Option<SocketAddr> {
        self.entries.write().remove(id)
    }

    /// Number of known servers
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
