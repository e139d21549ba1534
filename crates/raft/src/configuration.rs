//! Consensus configuration snapshots

use std::collections::BTreeMap;
use std::net::SocketAddr;

use group0_topology::ServerId;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// One server in the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMember {
    /// Server id
    pub id: ServerId,
    /// Address the server is reachable at
    pub address: SocketAddr,
    /// Voters take part in elections and commit quorums
    pub can_vote: bool,
}

impl ConfigMember {
    /// A voting member
    pub fn voter(id: ServerId, address: SocketAddr) -> Self {
        Self {
            id,
            address,
            can_vote: true,
        }
    }

    /// A non-voting member
    pub fn nonvoter(id: ServerId, address: SocketAddr) -> Self {
        Self {
            id,
            address,
            can_vote: false,
        }
    }
}

/// Set of servers in the group, keyed by id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    members: BTreeMap<ServerId, ConfigMember>,
}

impl Configuration {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` is in the configuration, optionally only as a voter
    pub fn contains(&self, id: &ServerId, voters_only: bool) -> bool {
        self.members
            .get(id)
            .is_some_and(|m| !voters_only || m.can_vote)
    }

    /// Look up a member
    pub fn get(&self, id: &ServerId) -> Option<&ConfigMember> {
        self.members.get(id)
    }

    /// Apply a change. Added members replace existing entries with the same
    /// id. Returns whether anything changed.
    pub fn apply(&mut self, add: &[ConfigMember], del: &[ServerId]) -> bool {
        let mut changed = false;
        for member in add {
            changed |= self.members.insert(member.id, *member) != Some(*member);
        }
        for id in del {
            changed |= self.members.remove(id).is_some();
        }
        if !changed {
            trace!(
                "Configuration change of {} additions and {} removals is a no-op",
                add.len(),
                del.len()
            );
        }
        changed
    }

    /// Voting members
    pub fn voters(&self) -> impl Iterator<Item = &ConfigMember> {
        self.members.values().filter(|m| m.can_vote)
    }

    /// All members
    pub fn iter(&self) -> impl Iterator<Item = &ConfigMember> {
        self.members.values()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the configuration is empty
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl FromIterator<ConfigMember> for Configuration {
    fn from_iter<I: IntoIterator<Item = ConfigMember>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().map(|m| (m.id, m)).collect(),
        }
    }
}
