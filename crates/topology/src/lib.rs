//! Identity and peer types shared by the group 0 crates
//!
//! This crate provides:
//! - Server and group identifiers (`ServerId`, `GroupId`)
//! - Discovery peers and deduplicated peer lists
//! - The server id to address map used to reach group 0 members

pub mod address_map;
pub mod error;
pub mod id;
pub mod peer;

pub use address_map::AddressMap;
pub use error::TopologyError;
pub use id::{GroupId, ServerId};
pub use peer::{DiscoveryPeer, Merge, PeerList, ReplaceInfo};
