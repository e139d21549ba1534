//! Upgrade of clusters that predate group 0
//!
//! Nodes that bootstrapped under the legacy procedures wait until the
//! cluster-wide feature is enabled, then run the upgrade as a tracked
//! background task:
//!
//! 1. wait until every node in gossip is alive
//! 2. create or join group 0 as a voter, using every node as a seed
//! 3. persist `Synchronize` and synchronize schema through group 0
//! 4. persist `UsePostRaftProcedures`
//!
//! Progress is persisted after each step, so a restarted node resumes from
//! where it stopped.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use group0_discovery::PeerExchange;
use group0_raft::{ConsensusEngine, Group0Server};
use group0_storage::{KeyValueStorage, UpgradeState};
use group0_topology::DiscoveryPeer;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::RaftGroup0;
use crate::collaborators::Gossiper;
use crate::{Group0Error, Group0Result};

/// In-memory progress of the upgrade to group 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeStatus {
    /// Still on the legacy procedures, upgrade not started
    Legacy,
    /// Upgrade running, currently at this persisted step
    InProgress(UpgradeState),
    /// Group 0 is in charge
    Complete,
    /// The upgrade stopped with an error
    Failed(String),
}

impl<E, S, T, G> RaftGroup0<E, S, T, G>
where
    E: ConsensusEngine,
    S: KeyValueStorage,
    T: PeerExchange,
    G: Gossiper,
{
    /// Current upgrade status
    pub fn upgrade_status(&self) -> UpgradeStatus {
        self.upgrade_status.borrow().clone()
    }

    /// Watch the upgrade status
    pub fn subscribe_upgrade_status(&self) -> watch::Receiver<UpgradeStatus> {
        self.upgrade_status.subscribe()
    }

    /// Start the upgrade in the background.
    ///
    /// Requires the upgrade feature to be enabled. Returns once the task is
    /// spawned; calls after the first are no-ops.
    pub async fn upgrade_to_group0(self: &Arc<Self>) -> Group0Result<()> {
        if !self.feature.is_enabled() {
            return Err(Group0Error::InvalidState(
                "the group 0 upgrade feature is not enabled".to_string(),
            ));
        }
        if self.upgrade_started.swap(true, Ordering::AcqRel) {
            debug!("Upgrade to group 0 already started");
            return Ok(());
        }

        let start_state = self.store.load_upgrade_state().await?;
        match start_state {
            UpgradeState::Recovery => {
                warn!("Group 0 is in recovery mode, not upgrading");
                return Ok(());
            }
            UpgradeState::UsePostRaftProcedures => {
                info!("Upgrade to group 0 already complete");
                self.upgrade_status.send_replace(UpgradeStatus::Complete);
                return Ok(());
            }
            UpgradeState::UsePreRaftProcedures | UpgradeState::Synchronize => {}
        }

        info!("Starting upgrade to group 0 from {:?}", start_state);
        let this = Arc::clone(self);
        self.task_tracker.spawn(async move {
            match this.do_upgrade_to_group0(start_state).await {
                Ok(()) => {
                    info!("Upgrade to group 0 complete");
                    this.upgrade_status.send_replace(UpgradeStatus::Complete);
                }
                Err(e) if e.is_aborted() => {
                    debug!("Upgrade to group 0 aborted");
                }
                Err(e) => {
                    error!("Upgrade to group 0 failed: {}", e);
                    this.upgrade_status
                        .send_replace(UpgradeStatus::Failed(e.to_string()));
                }
            }
        });
        Ok(())
    }

    /// Run the upgrade from `start_state` to `UsePostRaftProcedures`
    pub async fn do_upgrade_to_group0(&self, start_state: UpgradeState) -> Group0Result<()> {
        let mut state = start_state;

        if state == UpgradeState::UsePreRaftProcedures {
            self.upgrade_status
                .send_replace(UpgradeStatus::InProgress(state));
            self.wait_until_all_alive().await?;

            if self.joined_group0().await {
                debug!("Group 0 server already running");
            } else if let Some(group0_id) = self.store.load_group0_id().await? {
                self.start_server_for_group0(group0_id).await?;
            } else {
                let seeds: Vec<DiscoveryPeer> = self
                    .gossiper
                    .endpoints()
                    .await
                    .into_iter()
                    .map(|endpoint| match endpoint.server_id {
                        Some(id) => DiscoveryPeer::new(id, endpoint.address),
                        None => DiscoveryPeer::unidentified(endpoint.address),
                    })
                    .collect();
                self.join_group0(seeds, true).await?;
            }

            state = UpgradeState::Synchronize;
            self.store.save_upgrade_state(state).await?;
        }

        if state == UpgradeState::Synchronize {
            self.upgrade_status
                .send_replace(UpgradeStatus::InProgress(state));
            if !self.joined_group0().await {
                let group0_id = self.store.load_group0_id().await?.ok_or_else(|| {
                    Group0Error::Upgrade("no group 0 id persisted at Synchronize".to_string())
                })?;
                self.start_server_for_group0(group0_id).await?;
            }

            self.server()?.read_barrier(&self.shutdown_token).await?;
            info!("Synchronizing schema through group 0");
            self.schema.synchronize_schema(&self.shutdown_token).await?;

            self.store
                .save_upgrade_state(UpgradeState::UsePostRaftProcedures)
                .await?;
        }

        Ok(())
    }

    /// Listen for the upgrade feature, once
    pub(crate) fn arm_feature_listener(self: &Arc<Self>) {
        if self.feature_listener_armed.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!("Waiting for the group 0 upgrade feature");
        let this = Arc::clone(self);
        self.task_tracker.spawn(async move {
            let enabled = tokio::select! {
                _ = this.shutdown_token.cancelled() => return,
                enabled = this.feature.wait_enabled() => enabled,
            };
            if enabled.is_err() {
                warn!("Group 0 upgrade feature channel closed");
                return;
            }
            if let Err(e) = this.upgrade_to_group0().await {
                error!("Could not start upgrade to group 0: {}", e);
                this.upgrade_status
                    .send_replace(UpgradeStatus::Failed(e.to_string()));
            }
        });
    }

    async fn wait_until_all_alive(&self) -> Group0Result<()> {
        loop {
            let endpoints = self.gossiper.endpoints().await;
            let dead: Vec<_> = endpoints
                .iter()
                .filter(|e| !e.alive)
                .map(|e| e.address)
                .collect();
            if dead.is_empty() {
                info!("All {} cluster nodes are alive", endpoints.len());
                return Ok(());
            }

            info!("Waiting for {} dead nodes before upgrading: {:?}", dead.len(), dead);
            tokio::select! {
                _ = self.shutdown_token.cancelled() => return Err(Group0Error::Aborted),
                _ = tokio::time::sleep(self.config.upgrade.check_interval) => {}
            }
        }
    }
}
