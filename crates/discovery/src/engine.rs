//! The discovery algorithm
//!
//! Discovery proceeds in rounds. Each round the local peer list is sent to
//! every known peer not contacted yet, and every list that comes back is
//! merged. A round in which a new peer shows up is restarted. When every
//! known peer answered during a round that learned nothing new, the peer
//! set is stable and the smallest server id in it (ours included) is the
//! leader.
//!
//! Nodes that sent us a request are merged in too, but a request never
//! completes a round: only our own outgoing requests do.
//!
//! The engine does no I/O and never sleeps. The caller sends the requests
//! returned by [`Discovery::tick`], feeds answers back through
//! [`Discovery::response`], and decides when to tick again.

use std::collections::HashSet;
use std::net::SocketAddr;

use group0_topology::{DiscoveryPeer, Merge, PeerList};
use tracing::{debug, info};

/// What the caller should do after a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutput {
    /// Nothing to send right now, wait and tick again
    Pause,
    /// Send our peer list to these peers
    Contact(Vec<DiscoveryPeer>),
    /// The peer set is stable and this peer is the leader
    Leader(DiscoveryPeer),
}

/// Discovery state for one node
#[derive(Debug, Clone)]
pub struct Discovery {
    self_peer: DiscoveryPeer,
    /// Every known peer except ourselves
    peers: PeerList,
    /// Addresses sent a request during the current round
    contacted: HashSet<SocketAddr>,
    /// Addresses that answered during the current round
    responded: HashSet<SocketAddr>,
    leader: Option<DiscoveryPeer>,
    round: u64,
}

impl Discovery {
    /// Create the engine for `self_peer`, starting from `seeds`.
    ///
    /// Seeds pointing at ourselves are ignored. With no other seeds the
    /// first tick elects this node.
    pub fn new(self_peer: DiscoveryPeer, seeds: impl IntoIterator<Item = DiscoveryPeer>) -> Self {
        let mut discovery = Self {
            self_peer,
            peers: PeerList::new(),
            contacted: HashSet::new(),
            responded: HashSet::new(),
            leader: None,
            round: 0,
        };
        for seed in seeds {
            if !discovery.is_self(&seed) {
                discovery.peers.merge(seed);
            }
        }
        debug!(
            "Discovery for {} starting with {} seeds",
            self_peer,
            discovery.peers.len()
        );
        discovery
    }

    /// Handle an incoming peer exchange.
    ///
    /// Returns our peer list (ourselves included) and the peers we learned
    /// from the request. Once this node is the leader the sender is still
    /// merged but no list is returned, so a leader never counts towards
    /// anyone else's stable round.
    pub fn request(&mut self, peers: &PeerList) -> (Option<PeerList>, Vec<DiscoveryPeer>) {
        let learned = self.step(peers);
        if self.is_leader() {
            debug!("Already leader, withholding peer list");
            return (None, learned);
        }
        (Some(self.peer_list()), learned)
    }

    /// Handle the answer to a request we sent to `from`.
    ///
    /// Returns the peers learned from the answer.
    pub fn response(&mut self, from: &DiscoveryPeer, peers: &PeerList) -> Vec<DiscoveryPeer> {
        let learned = self.step(peers);
        self.contacted.insert(from.address);
        self.responded.insert(from.address);
        learned
    }

    /// Advance the state machine
    pub fn tick(&mut self) -> TickOutput {
        if self.is_leader() {
            return TickOutput::Leader(self.self_peer);
        }

        let to_contact: Vec<DiscoveryPeer> = self
            .peers
            .iter()
            .filter(|p| !self.contacted.contains(&p.address))
            .copied()
            .collect();
        if !to_contact.is_empty() {
            self.contacted
                .extend(to_contact.iter().map(|peer| peer.address));
            return TickOutput::Contact(to_contact);
        }

        let all_responded = self
            .peers
            .iter()
            .all(|p| self.responded.contains(&p.address));
        if !all_responded {
            // Retry the silent ones next tick
            let responded = &self.responded;
            self.contacted.retain(|address| responded.contains(address));
            return TickOutput::Pause;
        }

        if self.peers.iter().any(|p| !p.is_identified()) {
            self.new_round();
            return TickOutput::Pause;
        }

        let leader = self
            .peers
            .iter()
            .copied()
            .chain(std::iter::once(self.self_peer))
            .min_by_key(|p| p.id)
            .unwrap_or(self.self_peer);

        if self.leader != Some(leader) {
            info!(
                "Discovery round {} stable with {} peers, leader is {}",
                self.round,
                self.peers.len() + 1,
                leader
            );
        }
        self.leader = Some(leader);

        // Keep polling so we hear from the leader once it has created the group
        self.new_round();
        TickOutput::Leader(leader)
    }

    /// Our current peer list, ourselves included
    pub fn peer_list(&self) -> PeerList {
        std::iter::once(self.self_peer)
            .chain(self.peers.iter().copied())
            .collect()
    }

    /// The most recently decided leader
    pub fn leader(&self) -> Option<DiscoveryPeer> {
        self.leader
    }

    /// Whether this node was elected
    pub fn is_leader(&self) -> bool {
        self.leader == Some(self.self_peer)
    }

    /// This node
    pub fn self_peer(&self) -> DiscoveryPeer {
        self.self_peer
    }

    fn is_self(&self, peer: &DiscoveryPeer) -> bool {
        peer.address == self.self_peer.address
            || (peer.is_identified() && peer.id == self.self_peer.id)
    }

    fn step(&mut self, peers: &PeerList) -> Vec<DiscoveryPeer> {
        let mut learned = Vec::new();
        let mut grew = false;
        for peer in peers {
            if self.is_self(peer) {
                continue;
            }
            match self.peers.merge(*peer) {
                Merge::Added => {
                    grew = true;
                    learned.push(*peer);
                }
                Merge::Updated => learned.push(*peer),
                Merge::Unchanged => {}
            }
        }
        if grew {
            debug!(
                "Learned {} new peers, restarting discovery round",
                learned.len()
            );
            self.new_round();
        }
        learned
    }

    fn new_round(&mut self) {
        self.contacted.clear();
        self.responded.clear();
        self.round += 1;
    }
}
