//! Peer exchange messages and discovery outcomes

use group0_topology::{DiscoveryPeer, GroupId, PeerList};
use serde::{Deserialize, Serialize};

/// Answer to a peer exchange request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerExchangeResponse {
    /// The responder is still discovering; its current peer list, itself included
    Peers(PeerList),
    /// The responder already belongs to group 0
    Group0 {
        /// Id of the group the responder belongs to
        group0_id: GroupId,
        /// Who to join through
        leader: DiscoveryPeer,
    },
    /// The responder is neither discovering nor a member
    NotDiscovering,
}

/// What discovery decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Group0Info {
    /// This node won the tie-break and must create group 0 with the given id
    CreateGroup {
        /// Freshly generated id for the new group
        group0_id: GroupId,
    },
    /// Group 0 already exists; join it via the given peer
    JoinGroup {
        /// Id of the existing group
        group0_id: GroupId,
        /// Peer to send the join request to
        via: DiscoveryPeer,
    },
}

impl Group0Info {
    /// Id of the group this outcome refers to
    pub fn group0_id(&self) -> GroupId {
        match self {
            Self::CreateGroup { group0_id } | Self::JoinGroup { group0_id, .. } => *group0_id,
        }
    }
}
