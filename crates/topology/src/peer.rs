//! Discovery peers and peer lists

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ServerId;

/// A potential group 0 member: where to reach it and who it is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveryPeer {
    /// Server id, nil until the peer has told us
    pub id: ServerId,
    /// Address the peer exchange RPC is sent to
    pub address: SocketAddr,
}

impl DiscoveryPeer {
    /// Create a peer with a known identity
    pub const fn new(id: ServerId, address: SocketAddr) -> Self {
        Self { id, address }
    }

    /// Create a peer known only by address (e.g. a gossip contact node)
    pub const fn unidentified(address: SocketAddr) -> Self {
        Self {
            id: ServerId::nil(),
            address,
        }
    }

    /// Whether the server id of this peer is known
    pub fn is_identified(&self) -> bool {
        !self.id.is_nil()
    }
}

impl fmt::Display for DiscoveryPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_identified() {
            write!(f, "{}@{}", self.id, self.address)
        } else {
            write!(f, "?@{}", self.address)
        }
    }
}

/// Result of merging a peer into a [`PeerList`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// The peer was not known before
    Added,
    /// A known entry learned its id or a new address
    Updated,
    /// Nothing changed
    Unchanged,
}

impl Merge {
    /// Whether the list changed
    pub fn changed(self) -> bool {
        !matches!(self, Merge::Unchanged)
    }
}

/// Set of discovery peers.
///
/// Entries are deduplicated by server id. Entries whose id is still unknown
/// are deduplicated by address, and pick up the id once some list carries
/// it. Order is insertion order and has no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerList(Vec<DiscoveryPeer>);

impl PeerList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a single peer
    pub fn merge(&mut self, peer: DiscoveryPeer) -> Merge {
        if let Some(existing) = self.0.iter_mut().find(|p| p.address == peer.address) {
            if !peer.is_identified() || existing.id == peer.id {
                return Merge::Unchanged;
            }
            if !existing.is_identified() {
                // Another entry may already carry this id under an older address.
                let id = peer.id;
                existing.id = id;
                let address = peer.address;
                self.0.retain(|p| p.id != id || p.address == address);
                return Merge::Updated;
            }
            warn!(
                "Ignoring peer {} conflicting with known peer {}",
                peer, existing
            );
            return Merge::Unchanged;
        }

        if peer.is_identified() {
            if let Some(existing) = self.0.iter_mut().find(|p| p.id == peer.id) {
                existing.address = peer.address;
                return Merge::Updated;
            }
        }

        self.0.push(peer);
        Merge::Added
    }

    /// Merge every peer of `other`, returning the entries that changed
    pub fn merge_all<'a>(
        &mut self,
        other: impl IntoIterator<Item = &'a DiscoveryPeer>,
    ) -> Vec<DiscoveryPeer> {
        let mut changed = Vec::new();
        for peer in other {
            if self.merge(*peer).changed() {
                changed.push(*peer);
            }
        }
        changed
    }

    /// Look up the entry for an address
    pub fn get_by_address(&self, address: &SocketAddr) -> Option<&DiscoveryPeer> {
        self.0.iter().find(|p| &p.address == address)
    }

    /// Whether an entry exists for the address
    pub fn contains_address(&self, address: &SocketAddr) -> bool {
        self.get_by_address(address).is_some()
    }

    /// Iterate over the entries
    pub fn iter(&self) -> impl Iterator<Item = &DiscoveryPeer> {
        self.0.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the list
    pub fn into_vec(self) -> Vec<DiscoveryPeer> {
        self.0
    }
}

impl FromIterator<DiscoveryPeer> for PeerList {
    fn from_iter<I: IntoIterator<Item = DiscoveryPeer>>(iter: I) -> Self {
        let mut list = PeerList::new();
        for peer in iter {
            list.merge(peer);
        }
        list
    }
}

impl<'a> IntoIterator for &'a PeerList {
    type Item = &'a DiscoveryPeer;
    type IntoIter = std::slice::Iter<'a, DiscoveryPeer>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Passed to group 0 setup when this node replaces an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceInfo {
    /// Address of the replaced node
    pub address: SocketAddr,
    /// Server id of the replaced node
    pub server_id: ServerId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_merge_fills_in_unknown_id() {
        let mut list = PeerList::new();
        assert_eq!(list.merge(DiscoveryPeer::unidentified(addr(1))), Merge::Added);

        let id = ServerId::new_random();
        assert_eq!(list.merge(DiscoveryPeer::new(id, addr(1))), Merge::Updated);
        assert_eq!(list.len(), 1);
        assert_eq!(list.get_by_address(&addr(1)).unwrap().id, id);

        // An unidentified copy of a known peer changes nothing
        assert_eq!(
            list.merge(DiscoveryPeer::unidentified(addr(1))),
            Merge::Unchanged
        );
    }

    #[test]
    fn test_merge_deduplicates_by_id() {
        let id = ServerId::new_random();
        let mut list = PeerList::new();
        list.merge(DiscoveryPeer::new(id, addr(1)));

        assert_eq!(list.merge(DiscoveryPeer::new(id, addr(2))), Merge::Updated);
        assert_eq!(list.len(), 1);
        assert_eq!(list.iter().next().unwrap().address, addr(2));
    }

    #[test]
    fn test_conflicting_identity_keeps_existing() {
        let first = ServerId::new_random();
        let mut list = PeerList::new();
        list.merge(DiscoveryPeer::new(first, addr(1)));

        let other = ServerId::new_random();
        assert_eq!(
            list.merge(DiscoveryPeer::new(other, addr(1))),
            Merge::Unchanged
        );
        assert_eq!(list.get_by_address(&addr(1)).unwrap().id, first);
    }

    #[test]
    fn test_identifying_seed_drops_stale_address() {
        let id = ServerId::new_random();
        let mut list = PeerList::new();
        list.merge(DiscoveryPeer::new(id, addr(1)));
        list.merge(DiscoveryPeer::unidentified(addr(2)));

        // The seed at addr(2) turns out to be the peer we knew at addr(1)
        assert_eq!(list.merge(DiscoveryPeer::new(id, addr(2))), Merge::Updated);
        assert_eq!(list.len(), 1);
        assert!(list.contains_address(&addr(2)));
    }

    #[test]
    fn test_peer_list_serde() {
        let list: PeerList = [
            DiscoveryPeer::new(ServerId::new_random(), addr(1)),
            DiscoveryPeer::unidentified(addr(2)),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_string(&list).unwrap();
        let decoded: PeerList = serde_json::from_str(&json).unwrap();
        assert_eq!(list, decoded);
    }
}
