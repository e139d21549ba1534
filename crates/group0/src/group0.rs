//! Group 0 lifecycle
//!
//! [`RaftGroup0`] owns this node's relationship to group 0. A node starts
//! `Uninitialized`, discovers its peers, and ends up a `Member` of exactly
//! one group, whose id is persisted so that a restart goes straight back to
//! `Member`. `leave_group0` moves it to the terminal `Left` state.
//!
//! The state is written only by this type. The peer exchange handler reads
//! it and forwards requests to the discovery object while discovering.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use group0_discovery::{
    DiscoveryResult, Group0Info, PeerExchange, PeerExchangeHandler, PeerExchangeResponse,
    PersistentDiscovery,
};
use group0_raft::{ConfigMember, ConsensusEngine, Group0Server, RaftError};
use group0_storage::{KeyValueStorage, SystemStore, UpgradeState};
use group0_topology::{AddressMap, DiscoveryPeer, GroupId, PeerList, ReplaceInfo, ServerId};
use parking_lot::Mutex;
use prometheus::Registry;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::collaborators::{Gossiper, RaftFeature, SchemaCoordinator};
use crate::monitoring::{Group0Metrics, MonitoringStatus};
use crate::upgrade::UpgradeStatus;
use crate::{Group0Config, Group0Error, Group0Result};

/// Where this node stands with respect to group 0
pub(crate) enum Group0State<S>
where
    S: KeyValueStorage,
{
    Uninitialized,
    Discovering(Arc<PersistentDiscovery<S>>),
    Member(GroupId),
    Left(GroupId),
}

/// Observable summary of the lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group0Phase {
    /// Setup has not reached group 0 yet
    Uninitialized,
    /// Looking for peers
    Discovering,
    /// Member of the given group
    Member(GroupId),
    /// Left the given group
    Left(GroupId),
}

/// Collaborators and settings for [`RaftGroup0::new`]
pub struct RaftGroup0Options<E, S, T, G> {
    /// Settings
    pub config: Group0Config,
    /// Consensus engine that runs the group 0 server
    pub engine: Arc<E>,
    /// Durable storage for the system records
    pub storage: S,
    /// Peer exchange transport
    pub transport: Arc<T>,
    /// Gossip view of the cluster
    pub gossiper: Arc<G>,
    /// Schema synchronization used by the upgrade
    pub schema: Arc<dyn SchemaCoordinator>,
    /// Feature gating the upgrade of legacy clusters
    pub feature: RaftFeature,
    /// Registry the status gauge is registered in
    pub registry: Registry,
}

/// Group 0 bootstrap, membership and upgrade for one node
pub struct RaftGroup0<E, S, T, G>
where
    E: ConsensusEngine,
    S: KeyValueStorage,
    T: PeerExchange,
    G: Gossiper,
{
    pub(crate) config: Group0Config,
    pub(crate) engine: Arc<E>,
    pub(crate) store: SystemStore<S>,
    pub(crate) transport: Arc<T>,
    pub(crate) gossiper: Arc<G>,
    pub(crate) schema: Arc<dyn SchemaCoordinator>,
    pub(crate) feature: RaftFeature,
    pub(crate) address_map: AddressMap,
    pub(crate) metrics: Group0Metrics,

    pub(crate) state: RwLock<Group0State<S>>,
    pub(crate) server: OnceLock<Arc<E::Server>>,
    pub(crate) my_id: OnceLock<ServerId>,
    /// Replaced node to remove before promoting ourselves
    pub(crate) pending_replace: Mutex<Option<ReplaceInfo>>,

    setup_started: AtomicBool,
    pub(crate) recovery: AtomicBool,
    /// Set once `wait_for_raft` has returned true
    pub(crate) raft_ready: AtomicBool,
    /// Setup found an unfinished upgrade
    pub(crate) upgrade_pending: AtomicBool,
    pub(crate) feature_listener_armed: AtomicBool,
    pub(crate) upgrade_started: AtomicBool,
    pub(crate) upgrade_status: watch::Sender<UpgradeStatus>,

    pub(crate) shutdown_token: CancellationToken,
    pub(crate) task_tracker: TaskTracker,
}

impl<E, S, T, G> RaftGroup0<E, S, T, G>
where
    E: ConsensusEngine,
    S: KeyValueStorage,
    T: PeerExchange,
    G: Gossiper,
{
    /// Create a new instance. Nothing runs until `start` and `setup_group0`.
    pub fn new(
        RaftGroup0Options {
            config,
            engine,
            storage,
            transport,
            gossiper,
            schema,
            feature,
            registry,
        }: RaftGroup0Options<E, S, T, G>,
    ) -> Group0Result<Self> {
        let metrics = Group0Metrics::new(&registry)?;
        let (upgrade_status, _) = watch::channel(UpgradeStatus::Legacy);

        Ok(Self {
            config,
            engine,
            store: SystemStore::new(storage),
            transport,
            gossiper,
            schema,
            feature,
            address_map: AddressMap::new(),
            metrics,
            state: RwLock::new(Group0State::Uninitialized),
            server: OnceLock::new(),
            my_id: OnceLock::new(),
            pending_replace: Mutex::new(None),
            setup_started: AtomicBool::new(false),
            recovery: AtomicBool::new(false),
            raft_ready: AtomicBool::new(false),
            upgrade_pending: AtomicBool::new(false),
            feature_listener_armed: AtomicBool::new(false),
            upgrade_started: AtomicBool::new(false),
            upgrade_status,
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        })
    }

    /// Start serving peer exchange requests
    pub async fn start(self: &Arc<Self>) -> Group0Result<()> {
        let handler = Arc::new(Group0PeerExchange {
            group0: Arc::downgrade(self),
        });
        self.transport.register_handler(handler).await?;
        debug!("Group 0 peer exchange handler registered");
        Ok(())
    }

    /// Cancel everything in flight and shut down.
    ///
    /// Stops discovery, aborts the group 0 server, unregisters the peer
    /// exchange handler and waits for background tasks.
    pub async fn abort(&self) {
        info!("Aborting group 0");
        self.shutdown_token.cancel();

        let discovery = match &*self.state.read().await {
            Group0State::Discovering(discovery) => Some(discovery.clone()),
            _ => None,
        };
        if let Some(discovery) = discovery {
            discovery.stop().await;
        }

        if let Some(server) = self.server.get() {
            server.abort().await;
        }

        if let Err(e) = self.transport.unregister_handler().await {
            warn!("Failed to unregister peer exchange handler: {}", e);
        }

        self.task_tracker.close();
        self.task_tracker.wait().await;

        self.metrics.set_status(MonitoringStatus::Aborted);
        info!("Group 0 aborted");
    }

    /// Whether consensus-based coordination is enabled on this node
    pub fn is_raft_enabled(&self) -> bool {
        self.engine.is_enabled()
    }

    /// Bring this node into group 0. May only be called once.
    ///
    /// - consensus disabled: nothing to do
    /// - recovery mode: nothing to do, group 0 stays unavailable
    /// - group 0 id on disk: restart the existing server
    /// - node bootstrapped before group 0 existed: wait for the upgrade,
    ///   armed by [`RaftGroup0::finish_setup_after_join`]
    /// - otherwise: discover peers, then create or join group 0
    pub async fn setup_group0(
        &self,
        contact_nodes: Vec<SocketAddr>,
        replace_info: Option<ReplaceInfo>,
    ) -> Group0Result<()> {
        if self.setup_started.swap(true, Ordering::AcqRel) {
            return Err(Group0Error::InvalidState(
                "setup_group0 was already called".to_string(),
            ));
        }

        if !self.is_raft_enabled() {
            info!("Consensus is disabled, skipping group 0 setup");
            self.metrics.set_status(MonitoringStatus::Disabled);
            return Ok(());
        }

        let upgrade_state = self.store.load_upgrade_state().await?;
        if upgrade_state == UpgradeState::Recovery {
            warn!("Group 0 is in recovery mode, skipping setup");
            self.recovery.store(true, Ordering::Release);
            return Ok(());
        }

        let my_id = self.load_my_id().await?;
        self.load_initial_raft_address_map().await;

        if let Some(replace) = replace_info {
            info!(
                "Replacing node {} at {}",
                replace.server_id, replace.address
            );
            self.address_map
                .add_or_update(replace.server_id, replace.address);
            *self.pending_replace.lock() = Some(replace);
        }

        if let Some(group0_id) = self.store.load_group0_id().await? {
            info!("Found group 0 id {} on disk", group0_id);
            self.start_server_for_group0(group0_id).await?;
            if upgrade_state == UpgradeState::UsePostRaftProcedures {
                self.upgrade_status.send_replace(UpgradeStatus::Complete);
            } else {
                info!(
                    "Upgrade to group 0 unfinished ({:?}), will resume",
                    upgrade_state
                );
                self.upgrade_pending.store(true, Ordering::Release);
            }
            return Ok(());
        }

        if upgrade_state == UpgradeState::UsePreRaftProcedures
            && self.store.bootstrap_complete().await?
        {
            info!("Node bootstrapped before group 0, waiting for the cluster to upgrade");
            self.upgrade_pending.store(true, Ordering::Release);
            return Ok(());
        }

        let seeds = contact_nodes
            .into_iter()
            .map(DiscoveryPeer::unidentified)
            .collect();
        let group0_id = self.join_group0(seeds, false).await?;
        self.store
            .save_upgrade_state(UpgradeState::UsePostRaftProcedures)
            .await?;
        self.upgrade_status.send_replace(UpgradeStatus::Complete);

        info!("{} set up group 0 {}", my_id, group0_id);
        Ok(())
    }

    /// Finish what `setup_group0` could not do before the node joined the
    /// cluster.
    ///
    /// A group 0 member removes the node it replaces, if any, and promotes
    /// itself to voter. A node waiting for the upgrade starts listening for
    /// the feature that triggers it.
    pub async fn finish_setup_after_join(self: &Arc<Self>) -> Group0Result<()> {
        if self.joined_group0().await {
            let server = self.server()?;
            let my_id = self.my_id()?;

            let replace = self.pending_replace.lock().take();
            if let Some(replace) = replace {
                info!("Removing replaced node {} from group 0", replace.server_id);
                self.remove_server(&server, replace.server_id).await?;
                self.address_map.remove(&replace.server_id);
            }

            let configuration = server.configuration();
            let Some(me) = configuration.get(&my_id).copied() else {
                return Err(Group0Error::InvalidState(format!(
                    "{my_id} is not in the group 0 configuration"
                )));
            };
            if me.can_vote {
                debug!("{} is already a group 0 voter", my_id);
            } else {
                info!("Promoting {} to group 0 voter", my_id);
                self.modify_config_with_retry(
                    &server,
                    vec![ConfigMember::voter(my_id, me.address)],
                    vec![],
                )
                .await?;
            }
        }

        if self.upgrade_pending.load(Ordering::Acquire) {
            self.arm_feature_listener();
        }
        Ok(())
    }

    /// Wait until group 0 is usable.
    ///
    /// Returns `false` when consensus is disabled or in recovery mode.
    /// Otherwise waits for any upgrade in progress, performs a read barrier
    /// and returns `true`.
    pub async fn wait_for_raft(&self) -> Group0Result<bool> {
        if !self.is_raft_enabled() {
            return Ok(false);
        }
        if self.recovery.load(Ordering::Acquire) {
            warn!("Group 0 is in recovery mode");
            return Ok(false);
        }

        let mut status = self.upgrade_status.subscribe();
        loop {
            let current = status.borrow_and_update().clone();
            match &current {
                UpgradeStatus::Complete => break,
                UpgradeStatus::Failed(reason) => {
                    return Err(Group0Error::Upgrade(reason.clone()));
                }
                UpgradeStatus::Legacy | UpgradeStatus::InProgress(_) => {
                    debug!("Waiting for upgrade to group 0 ({:?})", current);
                }
            }
            tokio::select! {
                _ = self.shutdown_token.cancelled() => return Err(Group0Error::Aborted),
                changed = status.changed() => changed.map_err(|_| Group0Error::Aborted)?,
            }
        }

        let server = self.server()?;
        server.read_barrier(&self.shutdown_token).await?;
        self.raft_ready.store(true, Ordering::Release);
        debug!("Group 0 is ready");
        Ok(true)
    }

    /// Whether `id` is in the group 0 configuration, optionally as a voter.
    ///
    /// Only valid after `wait_for_raft` returned `true`.
    pub fn is_member(&self, id: &ServerId, voters_only: bool) -> Group0Result<bool> {
        let server = self.ready_server()?;
        Ok(server.configuration().contains(id, voters_only))
    }

    /// Handle a peer exchange request according to the lifecycle state
    pub async fn peer_exchange(&self, peers: PeerList) -> Group0Result<PeerExchangeResponse> {
        let discovery = match &*self.state.read().await {
            Group0State::Uninitialized | Group0State::Left(_) => {
                return Ok(PeerExchangeResponse::NotDiscovering);
            }
            Group0State::Member(group0_id) => {
                return Ok(PeerExchangeResponse::Group0 {
                    group0_id: *group0_id,
                    leader: DiscoveryPeer::new(self.my_id()?, self.gossiper.local_address()),
                });
            }
            Group0State::Discovering(discovery) => discovery.clone(),
        };

        Ok(match discovery.request(peers).await? {
            Some(peers) => PeerExchangeResponse::Peers(peers),
            None => PeerExchangeResponse::NotDiscovering,
        })
    }

    /// Discover peers, then create or join group 0, and persist its id.
    ///
    /// The discovery leader always creates the group as its only voter.
    /// Other nodes join as voters only when `as_voter` is set.
    pub async fn join_group0(
        &self,
        seeds: Vec<DiscoveryPeer>,
        as_voter: bool,
    ) -> Group0Result<GroupId> {
        let my_id = self.my_id()?;
        let local = DiscoveryPeer::new(my_id, self.gossiper.local_address());

        let discovery = Arc::new(
            PersistentDiscovery::make(
                local,
                seeds.into_iter().collect(),
                self.store.clone(),
                self.config.discovery.clone(),
            )
            .await?,
        );

        {
            let mut state = self.state.write().await;
            if !matches!(*state, Group0State::Uninitialized) {
                drop(state);
                discovery.stop().await;
                return Err(Group0Error::InvalidState(
                    "group 0 discovery already ran".to_string(),
                ));
            }
            *state = Group0State::Discovering(discovery.clone());
        }

        let joined = match discovery
            .run(self.transport.as_ref(), &self.shutdown_token)
            .await
        {
            Ok(info) => self.create_or_join(info, local, as_voter).await,
            Err(e) => Err(e.into()),
        };

        // Requests still in flight answer "not discovering" from here on
        discovery.stop().await;

        let server = match joined {
            Ok(server) => server,
            Err(e) => {
                *self.state.write().await = Group0State::Uninitialized;
                return Err(e);
            }
        };

        let group0_id = server.group0_id();
        if let Err(e) = self.store.persist_group0_id(group0_id).await {
            error!("Failed to persist group 0 id {}: {}", group0_id, e);
            server.abort().await;
            *self.state.write().await = Group0State::Uninitialized;
            return Err(e.into());
        }
        self.set_server(server)?;
        *self.state.write().await = Group0State::Member(group0_id);
        self.metrics.set_status(MonitoringStatus::Normal);

        info!("{} is now a member of group 0 {}", my_id, group0_id);
        Ok(group0_id)
    }

    /// Start the server of the group 0 we already belong to
    pub async fn start_server_for_group0(&self, group0_id: GroupId) -> Group0Result<()> {
        let my_id = self.my_id()?;
        info!("Starting group 0 server for {} in {}", my_id, group0_id);

        let server = self.engine.start_existing(group0_id, my_id).await?;
        self.set_server(server)?;
        self.address_map
            .add_or_update(my_id, self.gossiper.local_address());

        let mut state = self.state.write().await;
        if !matches!(*state, Group0State::Member(_)) {
            *state = Group0State::Member(group0_id);
        }
        self.metrics.set_status(MonitoringStatus::Normal);
        Ok(())
    }

    /// Read this node's server id from storage.
    ///
    /// The id is written when the node is provisioned; its absence is a
    /// configuration error.
    pub async fn load_my_id(&self) -> Group0Result<ServerId> {
        if let Some(id) = self.my_id.get() {
            return Ok(*id);
        }
        let id = self.store.load_local_server_id().await?.ok_or_else(|| {
            error!("Local server id is missing from the system store");
            Group0Error::Configuration("local server id was never set".to_string())
        })?;
        Ok(*self.my_id.get_or_init(|| id))
    }

    /// Whether the upgrade to group 0 is complete
    pub fn raft_upgrade_complete(&self) -> bool {
        matches!(*self.upgrade_status.borrow(), UpgradeStatus::Complete)
    }

    /// Server id to address mapping of group 0 members
    pub fn address_map(&self) -> &AddressMap {
        &self.address_map
    }

    /// The running group 0 server, if any
    pub fn group0_server(&self) -> Option<Arc<E::Server>> {
        self.server.get().cloned()
    }

    /// Current lifecycle state
    pub async fn phase(&self) -> Group0Phase {
        match &*self.state.read().await {
            Group0State::Uninitialized => Group0Phase::Uninitialized,
            Group0State::Discovering(_) => Group0Phase::Discovering,
            Group0State::Member(id) => Group0Phase::Member(*id),
            Group0State::Left(id) => Group0Phase::Left(*id),
        }
    }

    /// Status reported to monitoring
    pub fn status_for_monitoring(&self) -> MonitoringStatus {
        self.metrics.status()
    }

    pub(crate) async fn joined_group0(&self) -> bool {
        matches!(*self.state.read().await, Group0State::Member(_))
    }

    pub(crate) fn my_id(&self) -> Group0Result<ServerId> {
        self.my_id.get().copied().ok_or_else(|| {
            Group0Error::InvalidState("local server id not loaded yet".to_string())
        })
    }

    pub(crate) fn server(&self) -> Group0Result<Arc<E::Server>> {
        self.server
            .get()
            .cloned()
            .ok_or_else(|| Group0Error::InvalidState("group 0 server is not running".to_string()))
    }

    /// The server, provided `wait_for_raft` has succeeded
    pub(crate) fn ready_server(&self) -> Group0Result<Arc<E::Server>> {
        if !self.raft_ready.load(Ordering::Acquire) {
            return Err(Group0Error::InvalidState(
                "wait_for_raft has not completed".to_string(),
            ));
        }
        self.server()
    }

    fn set_server(&self, server: Arc<E::Server>) -> Group0Result<()> {
        self.server.set(server).map_err(|_| {
            Group0Error::InvalidState("group 0 server already started".to_string())
        })
    }

    async fn load_initial_raft_address_map(&self) {
        let endpoints = self.gossiper.endpoints().await;
        let mut loaded = 0;
        for endpoint in endpoints {
            if let Some(id) = endpoint.server_id {
                self.address_map.add_or_update(id, endpoint.address);
                loaded += 1;
            }
        }
        debug!("Loaded {} addresses from gossip", loaded);
    }

    async fn create_or_join(
        &self,
        info: Group0Info,
        local: DiscoveryPeer,
        as_voter: bool,
    ) -> Group0Result<Arc<E::Server>> {
        self.address_map.add_or_update(local.id, local.address);

        match info {
            Group0Info::CreateGroup { group0_id } => {
                info!("Creating group 0 {}", group0_id);
                let me = ConfigMember::voter(local.id, local.address);
                Ok(self.engine.create_group(group0_id, me).await?)
            }
            Group0Info::JoinGroup { group0_id, via } => {
                self.address_map.add_or_update(via.id, via.address);
                let me = ConfigMember {
                    id: local.id,
                    address: local.address,
                    can_vote: as_voter,
                };

                let mut backoff = self.config.retry.backoff();
                loop {
                    info!("Joining group 0 {} via {}", group0_id, via);
                    match self
                        .engine
                        .join_group(group0_id, me, via, &self.shutdown_token)
                        .await
                    {
                        Ok(server) => return Ok(server),
                        Err(
                            e @ (RaftError::CommitStatusUnknown
                            | RaftError::NotALeader(_)
                            | RaftError::Transport(_)),
                        ) => {
                            let delay = backoff.next_delay();
                            warn!("Join via {} failed: {}, retrying in {:?}", via, e, delay);
                            tokio::select! {
                                _ = self.shutdown_token.cancelled() => return Err(Group0Error::Aborted),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }
}

/// Peer exchange entry point registered with the transport.
///
/// Holds a weak reference so the transport does not keep group 0 alive.
struct Group0PeerExchange<E, S, T, G>
where
    E: ConsensusEngine,
    S: KeyValueStorage,
    T: PeerExchange,
    G: Gossiper,
{
    group0: Weak<RaftGroup0<E, S, T, G>>,
}

#[async_trait]
impl<E, S, T, G> PeerExchangeHandler for Group0PeerExchange<E, S, T, G>
where
    E: ConsensusEngine,
    S: KeyValueStorage,
    T: PeerExchange,
    G: Gossiper,
{
    async fn handle_peer_exchange(&self, peers: PeerList) -> DiscoveryResult<PeerExchangeResponse> {
        let Some(group0) = self.group0.upgrade() else {
            return Ok(PeerExchangeResponse::NotDiscovering);
        };
        group0.peer_exchange(peers).await.or_else(|e| match e {
            Group0Error::Discovery(e) => Err(e),
            other => {
                warn!("Peer exchange failed: {}", other);
                Ok(PeerExchangeResponse::NotDiscovering)
            }
        })
    }
}
