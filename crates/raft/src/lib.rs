//! Consensus engine seam for group 0
//!
//! The replicated log itself lives outside this workspace. This crate names
//! what group 0 needs from it: creating, joining or restarting the group's
//! server, reading the current configuration, read barriers, and
//! configuration changes whose outcome may be unknown.

pub mod configuration;
pub mod error;
pub mod server;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;

pub use configuration::{ConfigMember, Configuration};
pub use error::{RaftError, RaftResult};
pub use server::{ConsensusEngine, Group0Server};
