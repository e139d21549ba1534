//! Consensus engine and group 0 server traits

use std::sync::Arc;

use async_trait::async_trait;
use group0_topology::{DiscoveryPeer, GroupId, ServerId};
use tokio_util::sync::CancellationToken;

use crate::{ConfigMember, Configuration, RaftResult};

/// A running consensus server for group 0
#[async_trait]
pub trait Group0Server: Send + Sync + 'static {
    /// This server's id
    fn id(&self) -> ServerId;

    /// The group this server belongs to
    fn group0_id(&self) -> GroupId;

    /// Latest configuration known locally; may lag behind the leader
    fn configuration(&self) -> Configuration;

    /// Wait until the local state reflects everything committed before the call
    async fn read_barrier(&self, abort: &CancellationToken) -> RaftResult<()>;

    /// Add or replace members in `add` and remove `del`.
    ///
    /// Applying the same change twice leaves the configuration unchanged.
    /// Fails with [`crate::RaftError::CommitStatusUnknown`] when the change
    /// may or may not have been committed.
    async fn modify_config(
        &self,
        add: Vec<ConfigMember>,
        del: Vec<ServerId>,
        abort: &CancellationToken,
    ) -> RaftResult<()>;

    /// Stop the server; pending and later operations fail with `Aborted`
    async fn abort(&self);
}

/// Starts group 0 servers
#[async_trait]
pub trait ConsensusEngine: Send + Sync + 'static {
    /// Server type produced by this engine
    type Server: Group0Server;

    /// Whether consensus-based coordination is enabled on this node
    fn is_enabled(&self) -> bool;

    /// Create a new group whose only member is `me`, and start our server
    async fn create_group(&self, group0_id: GroupId, me: ConfigMember)
    -> RaftResult<Arc<Self::Server>>;

    /// Ask the group, through `via`, to add `me`, then start our server
    async fn join_group(
        &self,
        group0_id: GroupId,
        me: ConfigMember,
        via: DiscoveryPeer,
        abort: &CancellationToken,
    ) -> RaftResult<Arc<Self::Server>>;

    /// Start the server of a group this node already belongs to
    async fn start_existing(&self, group0_id: GroupId, me: ServerId)
    -> RaftResult<Arc<Self::Server>>;
}
