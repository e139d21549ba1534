//! Discovery with durable peer learning
//!
//! Wraps [`Discovery`] so that every peer learned, whether from a request
//! or from a response, is written to the system store before the engine
//! lock is released. A node that crashes mid-discovery therefore resumes
//! with every peer it had heard of.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::future::join_all;
use group0_storage::{KeyValueStorage, SystemStore};
use group0_topology::{DiscoveryPeer, GroupId, PeerList};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::transport::{PeerExchange, PeerExchangeHandler};
use crate::{
    Discovery, DiscoveryConfig, DiscoveryError, DiscoveryResult, Group0Info,
    PeerExchangeResponse, TickOutput,
};

/// Discovery engine whose learned peers survive restarts.
///
/// [`PersistentDiscovery::stop`] must be awaited before the value is
/// dropped. It may run concurrently with [`PersistentDiscovery::request`];
/// a concurrent [`PersistentDiscovery::run`] returns `Aborted`.
pub struct PersistentDiscovery<S>
where
    S: KeyValueStorage,
{
    self_peer: DiscoveryPeer,
    engine: Mutex<Discovery>,
    store: SystemStore<S>,
    config: DiscoveryConfig,
    /// Fired by `stop`; makes in-flight requests answer "not discovering"
    shutdown: CancellationToken,
    /// Tracks in-flight request handling
    gate: TaskTracker,
    stopped: AtomicBool,
}

impl<S> PersistentDiscovery<S>
where
    S: KeyValueStorage,
{
    /// Load the peers persisted for `self_peer`, add `seeds`, and build the engine
    pub async fn make(
        self_peer: DiscoveryPeer,
        seeds: PeerList,
        store: SystemStore<S>,
        config: DiscoveryConfig,
    ) -> DiscoveryResult<Self> {
        let mut peers = store.load_discovery_peers(&self_peer.id).await?;
        if !peers.is_empty() {
            info!(
                "Loaded {} persisted discovery peers for {}",
                peers.len(),
                self_peer.id
            );
        }
        peers.merge_all(&seeds);

        Ok(Self {
            self_peer,
            engine: Mutex::new(Discovery::new(self_peer, peers.into_vec())),
            store,
            config,
            shutdown: CancellationToken::new(),
            gate: TaskTracker::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Run discovery rounds until a decision is reached or `abort` fires
    pub async fn run<T>(&self, transport: &T, abort: &CancellationToken) -> DiscoveryResult<Group0Info>
    where
        T: PeerExchange + ?Sized,
    {
        info!("Starting group 0 discovery as {}", self.self_peer);

        loop {
            if abort.is_cancelled() || self.shutdown.is_cancelled() {
                return Err(DiscoveryError::Aborted);
            }

            let output = self.engine.lock().await.tick();
            match output {
                TickOutput::Leader(leader) if leader == self.self_peer => {
                    let group0_id = GroupId::new_random();
                    info!(
                        "Elected as discovery leader, creating group 0 {}",
                        group0_id
                    );
                    return Ok(Group0Info::CreateGroup { group0_id });
                }
                TickOutput::Contact(peers) => {
                    if let Some(info) = self.contact(transport, peers, abort).await? {
                        return Ok(info);
                    }
                }
                TickOutput::Leader(leader) => {
                    debug!("Waiting for leader {} to create group 0", leader);
                    self.pause(abort).await?;
                }
                TickOutput::Pause => self.pause(abort).await?,
            }
        }
    }

    /// Handle an incoming peer exchange.
    ///
    /// Returns our peer list, or `None` once discovery has been stopped or
    /// this node was elected.
    pub async fn request(&self, peers: PeerList) -> DiscoveryResult<Option<PeerList>> {
        if self.shutdown.is_cancelled() {
            return Ok(None);
        }
        let _token = self.gate.token();

        tokio::select! {
            _ = self.shutdown.cancelled() => Ok(None),
            result = self.handle_request(peers) => result,
        }
    }

    /// Stop serving requests and wait for in-flight ones to finish
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.gate.close();
        self.gate.wait().await;
        self.stopped.store(true, Ordering::Release);
        debug!("Discovery for {} stopped", self.self_peer);
    }

    /// The leader decided by the last stable round, if any
    pub async fn elected_leader(&self) -> Option<DiscoveryPeer> {
        self.engine.lock().await.leader()
    }

    /// Current peer list, ourselves included
    pub async fn peer_list(&self) -> PeerList {
        self.engine.lock().await.peer_list()
    }

    /// This node
    pub fn self_peer(&self) -> DiscoveryPeer {
        self.self_peer
    }

    async fn handle_request(&self, peers: PeerList) -> DiscoveryResult<Option<PeerList>> {
        let mut engine = self.engine.lock().await;
        let (snapshot, learned) = engine.request(&peers);
        self.persist(&learned).await?;
        Ok(snapshot)
    }

    async fn contact<T>(
        &self,
        transport: &T,
        peers: Vec<DiscoveryPeer>,
        abort: &CancellationToken,
    ) -> DiscoveryResult<Option<Group0Info>>
    where
        T: PeerExchange + ?Sized,
    {
        let our_list = self.engine.lock().await.peer_list();
        let request_timeout = self.config.request_timeout;

        let requests = peers.into_iter().map(|peer| {
            let list = our_list.clone();
            async move {
                let result = match timeout(request_timeout, transport.peer_exchange(&peer, list))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(DiscoveryError::Timeout(peer.address)),
                };
                (peer, result)
            }
        });

        let results = tokio::select! {
            _ = abort.cancelled() => return Err(DiscoveryError::Aborted),
            results = join_all(requests) => results,
        };

        for (peer, result) in results {
            match result {
                Ok(PeerExchangeResponse::Peers(list)) => {
                    let mut engine = self.engine.lock().await;
                    let learned = engine.response(&peer, &list);
                    self.persist(&learned).await?;
                }
                Ok(PeerExchangeResponse::Group0 { group0_id, leader }) => {
                    info!(
                        "Peer {} belongs to group 0 {}, joining via {}",
                        peer, group0_id, leader
                    );
                    return Ok(Some(Group0Info::JoinGroup {
                        group0_id,
                        via: leader,
                    }));
                }
                Ok(PeerExchangeResponse::NotDiscovering) => {
                    debug!("Peer {} is not discovering", peer);
                }
                Err(e) => {
                    debug!("Peer exchange with {} failed: {}", peer, e);
                }
            }
        }

        Ok(None)
    }

    async fn pause(&self, abort: &CancellationToken) -> DiscoveryResult<()> {
        tokio::select! {
            _ = abort.cancelled() => Err(DiscoveryError::Aborted),
            _ = self.shutdown.cancelled() => Err(DiscoveryError::Aborted),
            _ = sleep(self.config.pause_interval) => Ok(()),
        }
    }

    async fn persist(&self, learned: &[DiscoveryPeer]) -> DiscoveryResult<()> {
        if learned.is_empty() {
            return Ok(());
        }
        self.store
            .append_discovery_peers(&self.self_peer.id, learned)
            .await
            .map_err(|e| {
                warn!("Failed to persist {} discovery peers: {}", learned.len(), e);
                DiscoveryError::from(e)
            })
    }
}

#[async_trait]
impl<S> PeerExchangeHandler for PersistentDiscovery<S>
where
    S: KeyValueStorage,
{
    async fn handle_peer_exchange(&self, peers: PeerList) -> DiscoveryResult<PeerExchangeResponse> {
        Ok(match self.request(peers).await? {
            Some(list) => PeerExchangeResponse::Peers(list),
            None => PeerExchangeResponse::NotDiscovering,
        })
    }
}

impl<S> Drop for PersistentDiscovery<S>
where
    S: KeyValueStorage,
{
    fn drop(&mut self) {
        if !self.stopped.load(Ordering::Acquire) {
            error!(
                "Discovery for {} dropped without being stopped",
                self.self_peer
            );
        }
    }
}
