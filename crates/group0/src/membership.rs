//! Voter, non-voter and removal operations on the group 0 configuration
//!
//! Every change goes through [`RaftGroup0::modify_config_with_retry`]: an
//! unknown commit status is retried with capped backoff until the change
//! lands or fails definitively. Changes are idempotent, and a change that is
//! no longer needed is skipped before it is sent.

use std::sync::Arc;

use group0_discovery::PeerExchange;
use group0_raft::{ConfigMember, ConsensusEngine, Group0Server, RaftError};
use group0_storage::KeyValueStorage;
use group0_topology::ServerId;
use tracing::{debug, info, warn};

use crate::RaftGroup0;
use crate::collaborators::Gossiper;
use crate::group0::Group0State;
use crate::{Group0Error, Group0Result};

impl<E, S, T, G> RaftGroup0<E, S, T, G>
where
    E: ConsensusEngine,
    S: KeyValueStorage,
    T: PeerExchange,
    G: Gossiper,
{
    /// Demote this node to non-voter
    pub async fn become_nonvoter(&self) -> Group0Result<()> {
        let my_id = self.my_id()?;
        self.make_nonvoter(my_id).await
    }

    /// Demote `id` to non-voter. A non-member is left alone.
    pub async fn make_nonvoter(&self, id: ServerId) -> Group0Result<()> {
        let server = self.ready_server()?;
        let Some(member) = server.configuration().get(&id).copied() else {
            info!("{} is not in group 0, nothing to demote", id);
            return Ok(());
        };
        if !member.can_vote {
            debug!("{} is already a non-voter", id);
            return Ok(());
        }

        info!("Demoting {} to group 0 non-voter", id);
        self.modify_config_with_retry(
            &server,
            vec![ConfigMember::nonvoter(id, member.address)],
            vec![],
        )
        .await
    }

    /// Promote `id` to voter. `id` must already be a member.
    pub async fn make_voter(&self, id: ServerId) -> Group0Result<()> {
        let server = self.ready_server()?;
        let Some(member) = server.configuration().get(&id).copied() else {
            return Err(Group0Error::InvalidState(format!(
                "{id} is not in the group 0 configuration"
            )));
        };
        if member.can_vote {
            debug!("{} is already a voter", id);
            return Ok(());
        }

        info!("Promoting {} to group 0 voter", id);
        self.modify_config_with_retry(
            &server,
            vec![ConfigMember::voter(id, member.address)],
            vec![],
        )
        .await
    }

    /// Remove this node from group 0 and move to the `Left` state.
    ///
    /// Skips the removal when the local configuration no longer lists us.
    /// The change is sent through our own server, so while no leader is
    /// reachable the call waits until `abort`.
    pub async fn leave_group0(&self) -> Group0Result<()> {
        let server = self.ready_server()?;
        let my_id = self.my_id()?;

        let group0_id = match &*self.state.read().await {
            Group0State::Member(id) => *id,
            Group0State::Left(_) => {
                debug!("Already left group 0");
                return Ok(());
            }
            _ => {
                return Err(Group0Error::InvalidState(
                    "not a member of group 0".to_string(),
                ));
            }
        };

        if server.configuration().contains(&my_id, false) {
            info!("{} leaving group 0 {}", my_id, group0_id);
            self.modify_config_with_retry(&server, vec![], vec![my_id])
                .await?;
        } else {
            info!("{} already removed from group 0 {}", my_id, group0_id);
        }

        *self.state.write().await = Group0State::Left(group0_id);
        Ok(())
    }

    /// Remove another node from group 0
    pub async fn remove_from_group0(&self, id: ServerId) -> Group0Result<()> {
        if id == self.my_id()? {
            return Err(Group0Error::InvalidState(
                "use leave_group0 to remove this node".to_string(),
            ));
        }
        self.remove_from_raft_config(id).await
    }

    /// Remove `id` from the configuration, whoever it is
    pub async fn remove_from_raft_config(&self, id: ServerId) -> Group0Result<()> {
        let server = self.ready_server()?;
        self.remove_server(&server, id).await?;
        self.address_map.remove(&id);
        Ok(())
    }

    pub(crate) async fn remove_server(
        &self,
        server: &Arc<E::Server>,
        id: ServerId,
    ) -> Group0Result<()> {
        if !server.configuration().contains(&id, false) {
            info!("{} is not in group 0, nothing to remove", id);
            return Ok(());
        }
        info!("Removing {} from group 0", id);
        self.modify_config_with_retry(server, vec![], vec![id])
            .await
    }

    /// Apply a configuration change, retrying while its outcome is unknown
    pub(crate) async fn modify_config_with_retry(
        &self,
        server: &Arc<E::Server>,
        add: Vec<ConfigMember>,
        del: Vec<ServerId>,
    ) -> Group0Result<()> {
        let mut backoff = self.config.retry.backoff();
        let mut attempt = 1u32;
        loop {
            match server
                .modify_config(add.clone(), del.clone(), &self.shutdown_token)
                .await
            {
                Ok(()) => {
                    if attempt > 1 {
                        info!("Configuration change committed after {} attempts", attempt);
                    }
                    return Ok(());
                }
                Err(RaftError::CommitStatusUnknown) => {
                    let delay = backoff.next_delay();
                    warn!(
                        "Commit status of configuration change unknown (attempt {}), retrying in {:?}",
                        attempt, delay
                    );
                    tokio::select! {
                        _ = self.shutdown_token.cancelled() => return Err(Group0Error::Aborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(RaftError::Aborted) => return Err(Group0Error::Aborted),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
