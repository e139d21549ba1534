//! Peer discovery for bootstrapping group 0
//!
//! Before any consensus group exists, nodes find each other by exchanging
//! peer lists. Once the set of reachable peers stops growing, the node with
//! the smallest server id is chosen to create the group; every other node
//! keeps polling until some peer answers with the id of a group to join.
//!
//! - [`Discovery`] is the pure algorithm, driven by `tick`/`response`
//! - [`PersistentDiscovery`] persists learned peers and runs the rounds
//!   over a [`PeerExchange`] transport

pub mod config;
pub mod engine;
pub mod error;
pub mod messages;
pub mod persistent;
pub mod transport;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;

pub use config::DiscoveryConfig;
pub use engine::{Discovery, TickOutput};
pub use error::{DiscoveryError, DiscoveryResult};
pub use messages::{Group0Info, PeerExchangeResponse};
pub use persistent::PersistentDiscovery;
pub use transport::{PeerExchange, PeerExchangeHandler};
