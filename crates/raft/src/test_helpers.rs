//! In-memory consensus for tests
//!
//! All servers of a [`MemoryRaftCluster`] share one configuration per group
//! and commit changes instantly. Faults can be queued to make the next
//! configuration changes fail, and the cluster can be made leaderless so
//! that operations block until cancelled.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use group0_topology::{DiscoveryPeer, GroupId, ServerId};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{ConfigMember, Configuration, ConsensusEngine, Group0Server, RaftError, RaftResult};

/// Fault applied to the next configuration change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Report an unknown commit status; `applied` says whether the change
    /// was in fact committed
    CommitUnknown {
        /// Whether the change took effect anyway
        applied: bool,
    },
    /// Refuse the change
    Reject(String),
}

/// A committed configuration change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    /// Members added or replaced
    pub add: Vec<ConfigMember>,
    /// Members removed
    pub del: Vec<ServerId>,
}

#[derive(Debug, Default)]
struct GroupState {
    configuration: Configuration,
    log: Vec<ConfigChange>,
}

#[derive(Debug, Default)]
struct ClusterState {
    groups: HashMap<GroupId, GroupState>,
    faults: VecDeque<Fault>,
    leaderless: bool,
    read_barriers: usize,
    modify_attempts: usize,
}

/// Shared state of every in-memory group
#[derive(Debug, Clone, Default)]
pub struct MemoryRaftCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MemoryRaftCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for an upcoming configuration change
    pub fn inject_fault(&self, fault: Fault) {
        self.state.lock().faults.push_back(fault);
    }

    /// While leaderless, barriers and configuration changes block until cancelled
    pub fn set_leaderless(&self, leaderless: bool) {
        self.state.lock().leaderless = leaderless;
    }

    /// Ids of every group created so far
    pub fn groups(&self) -> Vec<GroupId> {
        self.state.lock().groups.keys().copied().collect()
    }

    /// Current configuration of a group
    pub fn configuration(&self, group0_id: &GroupId) -> Option<Configuration> {
        self.state
            .lock()
            .groups
            .get(group0_id)
            .map(|g| g.configuration.clone())
    }

    /// Committed configuration changes of a group, oldest first
    pub fn config_log(&self, group0_id: &GroupId) -> Vec<ConfigChange> {
        self.state
            .lock()
            .groups
            .get(group0_id)
            .map(|g| g.log.clone())
            .unwrap_or_default()
    }

    /// Number of read barriers served
    pub fn read_barriers(&self) -> usize {
        self.state.lock().read_barriers
    }

    /// Number of configuration changes attempted, failed ones included
    pub fn modify_attempts(&self) -> usize {
        self.state.lock().modify_attempts
    }

    fn is_leaderless(&self) -> bool {
        self.state.lock().leaderless
    }

    async fn wait_for_leader(&self, abort: &CancellationToken) -> RaftResult<()> {
        if self.is_leaderless() {
            abort.cancelled().await;
            return Err(RaftError::Aborted);
        }
        Ok(())
    }

    fn commit(&self, group0_id: &GroupId, add: &[ConfigMember], del: &[ServerId]) -> RaftResult<()> {
        let mut state = self.state.lock();
        state.modify_attempts += 1;

        let fault = state.faults.pop_front();
        let group = state
            .groups
            .get_mut(group0_id)
            .ok_or(RaftError::GroupNotFound(*group0_id))?;

        match fault {
            Some(Fault::Reject(reason)) => Err(RaftError::Rejected(reason)),
            Some(Fault::CommitUnknown { applied }) => {
                if applied {
                    Self::apply(group, add, del);
                }
                Err(RaftError::CommitStatusUnknown)
            }
            None => {
                Self::apply(group, add, del);
                Ok(())
            }
        }
    }

    fn apply(group: &mut GroupState, add: &[ConfigMember], del: &[ServerId]) {
        if group.configuration.apply(add, del) {
            group.log.push(ConfigChange {
                add: add.to_vec(),
                del: del.to_vec(),
            });
        }
    }
}

/// Consensus engine backed by a [`MemoryRaftCluster`]
#[derive(Debug)]
pub struct MemoryConsensus {
    cluster: MemoryRaftCluster,
    enabled: bool,
    create_calls: AtomicUsize,
    join_calls: AtomicUsize,
    start_calls: AtomicUsize,
}

impl MemoryConsensus {
    /// Create an engine attached to `cluster`
    pub fn new(cluster: MemoryRaftCluster) -> Self {
        Self {
            cluster,
            enabled: true,
            create_calls: AtomicUsize::new(0),
            join_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
        }
    }

    /// Toggle whether consensus is enabled on this node
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Number of `create_group` calls
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::Relaxed)
    }

    /// Number of `join_group` calls
    pub fn join_calls(&self) -> usize {
        self.join_calls.load(Ordering::Relaxed)
    }

    /// Number of `start_existing` calls
    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::Relaxed)
    }

    fn server(&self, group0_id: GroupId, id: ServerId) -> Arc<MemoryServer> {
        Arc::new(MemoryServer {
            id,
            group0_id,
            cluster: self.cluster.clone(),
            aborted: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ConsensusEngine for MemoryConsensus {
    type Server = MemoryServer;

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn create_group(
        &self,
        group0_id: GroupId,
        me: ConfigMember,
    ) -> RaftResult<Arc<MemoryServer>> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.cluster.state.lock();
            if state.groups.contains_key(&group0_id) {
                return Err(RaftError::Rejected(format!("group {group0_id} exists")));
            }
            let mut group = GroupState::default();
            MemoryRaftCluster::apply(&mut group, &[me], &[]);
            state.groups.insert(group0_id, group);
        }
        info!("Created in-memory group {} with {}", group0_id, me.id);
        Ok(self.server(group0_id, me.id))
    }

    async fn join_group(
        &self,
        group0_id: GroupId,
        me: ConfigMember,
        via: DiscoveryPeer,
        abort: &CancellationToken,
    ) -> RaftResult<Arc<MemoryServer>> {
        self.join_calls.fetch_add(1, Ordering::Relaxed);
        debug!("{} joining group {} via {}", me.id, group0_id, via);
        self.cluster.wait_for_leader(abort).await?;
        self.cluster.commit(&group0_id, &[me], &[])?;
        Ok(self.server(group0_id, me.id))
    }

    async fn start_existing(
        &self,
        group0_id: GroupId,
        me: ServerId,
    ) -> RaftResult<Arc<MemoryServer>> {
        self.start_calls.fetch_add(1, Ordering::Relaxed);
        if !self.cluster.state.lock().groups.contains_key(&group0_id) {
            return Err(RaftError::GroupNotFound(group0_id));
        }
        Ok(self.server(group0_id, me))
    }
}

/// Server handle returned by [`MemoryConsensus`]
#[derive(Debug)]
pub struct MemoryServer {
    id: ServerId,
    group0_id: GroupId,
    cluster: MemoryRaftCluster,
    aborted: AtomicBool,
}

impl MemoryServer {
    /// Whether `abort` was called
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn check_running(&self) -> RaftResult<()> {
        if self.is_aborted() {
            return Err(RaftError::Aborted);
        }
        Ok(())
    }
}

#[async_trait]
impl Group0Server for MemoryServer {
    fn id(&self) -> ServerId {
        self.id
    }

    fn group0_id(&self) -> GroupId {
        self.group0_id
    }

    fn configuration(&self) -> Configuration {
        self.cluster
            .configuration(&self.group0_id)
            .unwrap_or_default()
    }

    async fn read_barrier(&self, abort: &CancellationToken) -> RaftResult<()> {
        self.check_running()?;
        self.cluster.wait_for_leader(abort).await?;
        self.cluster.state.lock().read_barriers += 1;
        Ok(())
    }

    async fn modify_config(
        &self,
        add: Vec<ConfigMember>,
        del: Vec<ServerId>,
        abort: &CancellationToken,
    ) -> RaftResult<()> {
        self.check_running()?;
        self.cluster.wait_for_leader(abort).await?;
        self.cluster.commit(&self.group0_id, &add, &del)
    }

    async fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }
}
