//! Test cluster utilities for group 0 integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use group0::{
    GossipEndpoint, Gossiper, Group0Config, Group0Error, Group0Result, RaftFeature, RaftGroup0,
    RaftGroup0Options, RetryConfig, SchemaCoordinator, UpgradeConfig,
};
use group0_discovery::DiscoveryConfig;
use group0_discovery::test_helpers::{MemoryNetwork, MemoryPeerExchange};
use group0_raft::test_helpers::{MemoryConsensus, MemoryRaftCluster};
use group0_storage::SystemStore;
use group0_storage_memory::MemoryStorage;
use group0_topology::ServerId;
use parking_lot::Mutex;
use prometheus::Registry;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Group 0 over the in-memory collaborators
pub type TestGroup0 = RaftGroup0<MemoryConsensus, MemoryStorage, MemoryPeerExchange, MemoryGossiper>;

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(10);

pub fn server_id(n: u128) -> ServerId {
    ServerId::from_uuid(Uuid::from_u128(n))
}

pub fn addr(i: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, i], 7000))
}

pub fn fast_config() -> Group0Config {
    Group0Config {
        discovery: DiscoveryConfig {
            pause_interval: Duration::from_millis(10),
            request_timeout: Duration::from_millis(200),
        },
        retry: RetryConfig {
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        },
        upgrade: UpgradeConfig {
            check_interval: Duration::from_millis(10),
        },
    }
}

/// Cluster membership as gossip sees it, shared by every node
#[derive(Debug, Clone, Default)]
pub struct GossipView {
    endpoints: Arc<Mutex<Vec<GossipEndpoint>>>,
}

impl GossipView {
    pub fn add(&self, address: SocketAddr, server_id: Option<ServerId>, alive: bool) {
        let mut endpoints = self.endpoints.lock();
        endpoints.retain(|e| e.address != address);
        endpoints.push(GossipEndpoint {
            address,
            server_id,
            alive,
        });
    }

    pub fn remove(&self, address: SocketAddr) {
        self.endpoints.lock().retain(|e| e.address != address);
    }

    pub fn set_alive(&self, address: SocketAddr, alive: bool) {
        for endpoint in self.endpoints.lock().iter_mut() {
            if endpoint.address == address {
                endpoint.alive = alive;
            }
        }
    }
}

#[derive(Debug)]
pub struct MemoryGossiper {
    local: SocketAddr,
    view: GossipView,
}

#[async_trait]
impl Gossiper for MemoryGossiper {
    fn local_address(&self) -> SocketAddr {
        self.local
    }

    async fn endpoints(&self) -> Vec<GossipEndpoint> {
        self.view.endpoints.lock().clone()
    }
}

/// Counts schema synchronizations, optionally failing them
#[derive(Debug, Default)]
pub struct MemorySchema {
    syncs: AtomicUsize,
    fail: AtomicBool,
}

impl MemorySchema {
    pub fn syncs(&self) -> usize {
        self.syncs.load(Ordering::Relaxed)
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl SchemaCoordinator for MemorySchema {
    async fn synchronize_schema(&self, _abort: &CancellationToken) -> Group0Result<()> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(Group0Error::Schema("schema pull refused".to_string()));
        }
        self.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// One group 0 instance and the handles a test inspects
pub struct TestNode {
    pub id: ServerId,
    pub address: SocketAddr,
    pub storage: MemoryStorage,
    pub engine: Arc<MemoryConsensus>,
    pub schema: Arc<MemorySchema>,
    pub group0: Arc<TestGroup0>,
}

impl TestNode {
    pub fn store(&self) -> SystemStore<MemoryStorage> {
        SystemStore::new(self.storage.clone())
    }
}

/// Shared network, consensus and gossip for a set of test nodes
pub struct TestCluster {
    pub network: MemoryNetwork,
    pub raft: MemoryRaftCluster,
    pub gossip: GossipView,
    feature_tx: watch::Sender<bool>,
    feature: RaftFeature,
}

impl TestCluster {
    pub fn new() -> Self {
        let (feature_tx, feature) = RaftFeature::channel(false);
        Self {
            network: MemoryNetwork::new(),
            raft: MemoryRaftCluster::new(),
            gossip: GossipView::default(),
            feature_tx,
            feature,
        }
    }

    pub fn enable_feature(&self) {
        self.feature_tx.send_replace(true);
    }

    /// Storage with the local server id already written
    pub async fn provision(&self, id: ServerId) -> MemoryStorage {
        let storage = MemoryStorage::new();
        SystemStore::new(storage.clone())
            .save_local_server_id(id)
            .await
            .unwrap();
        storage
    }

    /// Provision a fresh node and start it
    pub async fn spawn(&self, n: u128, i: u8) -> TestNode {
        let id = server_id(n);
        let storage = self.provision(id).await;
        self.start_node(id, addr(i), storage, MemoryConsensus::new(self.raft.clone()))
            .await
    }

    /// Start a node on existing storage, e.g. after a restart
    pub async fn start_node(
        &self,
        id: ServerId,
        address: SocketAddr,
        storage: MemoryStorage,
        engine: MemoryConsensus,
    ) -> TestNode {
        let engine = Arc::new(engine);
        let schema = Arc::new(MemorySchema::default());
        let group0 = Arc::new(
            RaftGroup0::new(RaftGroup0Options {
                config: fast_config(),
                engine: engine.clone(),
                storage: storage.clone(),
                transport: Arc::new(self.network.transport(address)),
                gossiper: Arc::new(MemoryGossiper {
                    local: address,
                    view: self.gossip.clone(),
                }),
                schema: schema.clone(),
                feature: self.feature.clone(),
                registry: Registry::new(),
            })
            .unwrap(),
        );
        group0.start().await.unwrap();

        TestNode {
            id,
            address,
            storage,
            engine,
            schema,
            group0,
        }
    }

    /// Full bootstrap of a node: setup, finish after join, wait for raft
    pub async fn bootstrap(&self, node: &TestNode, contact_nodes: Vec<SocketAddr>) {
        node.group0.setup_group0(contact_nodes, None).await.unwrap();
        node.group0.finish_setup_after_join().await.unwrap();
        assert!(node.group0.wait_for_raft().await.unwrap());
    }
}
