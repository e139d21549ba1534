//! Typed records kept by group 0 across restarts

use bytes::Bytes;
use group0_topology::{DiscoveryPeer, GroupId, PeerList, ServerId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{KeyValueStorage, StorageError, StorageKey, StorageNamespace, StorageResult};

const SYSTEM_NAMESPACE: &str = "system";
const GROUP0_ID_KEY: &str = "group0_id";
const UPGRADE_STATE_KEY: &str = "group0_upgrade_state";
const LOCAL_SERVER_ID_KEY: &str = "local_server_id";
const BOOTSTRAP_COMPLETE_KEY: &str = "bootstrap_complete";
const DISCOVERY_PREFIX: &str = "discovery/";

/// How far the switch from pre-consensus procedures to group 0 has progressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeState {
    /// Schema and topology changes still use the legacy procedures
    #[default]
    UsePreRaftProcedures,
    /// Group 0 exists; schema is being synchronized through it
    Synchronize,
    /// Upgrade finished, group 0 is authoritative
    UsePostRaftProcedures,
    /// Administrative override: group 0 operations are unavailable
    Recovery,
}

/// Typed view over the node-local system records.
#[derive(Debug, Clone)]
pub struct SystemStore<S>
where
    S: KeyValueStorage,
{
    storage: S,
    namespace: StorageNamespace,
}

impl<S> SystemStore<S>
where
    S: KeyValueStorage,
{
    /// Create a store over a backend
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            namespace: StorageNamespace::new(SYSTEM_NAMESPACE),
        }
    }

    /// Get the backend
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Peers persisted by discovery for the given node
    pub async fn load_discovery_peers(&self, owner: &ServerId) -> StorageResult<PeerList> {
        Ok(self
            .get::<PeerList>(&discovery_key(owner))
            .await?
            .unwrap_or_default())
    }

    /// Add learned peers to the node's persisted peer list
    pub async fn append_discovery_peers(
        &self,
        owner: &ServerId,
        peers: &[DiscoveryPeer],
    ) -> StorageResult<()> {
        if peers.is_empty() {
            return Ok(());
        }

        let key = discovery_key(owner);
        let mut stored = self.get::<PeerList>(&key).await?.unwrap_or_default();
        if stored.merge_all(peers).is_empty() {
            return Ok(());
        }

        debug!(
            "Persisting {} discovery peers ({} learned)",
            stored.len(),
            peers.len()
        );
        self.put(&key, &stored).await
    }

    /// The persisted group 0 id, if group 0 was ever joined
    pub async fn load_group0_id(&self) -> StorageResult<Option<GroupId>> {
        self.get(&StorageKey::from(GROUP0_ID_KEY)).await
    }

    /// Persist the group 0 id. Writing the same id again is a no-op,
    /// writing a different one is an error.
    pub async fn persist_group0_id(&self, group0_id: GroupId) -> StorageResult<()> {
        let key = StorageKey::from(GROUP0_ID_KEY);
        match self.get::<GroupId>(&key).await? {
            Some(existing) if existing == group0_id => Ok(()),
            Some(existing) => Err(StorageError::AlreadySet(format!(
                "{GROUP0_ID_KEY} = {existing}, refusing {group0_id}"
            ))),
            None => {
                info!("Persisting group 0 id {}", group0_id);
                self.put(&key, &group0_id).await
            }
        }
    }

    /// The persisted upgrade state; nodes that never stored one are at the start
    pub async fn load_upgrade_state(&self) -> StorageResult<UpgradeState> {
        Ok(self
            .get(&StorageKey::from(UPGRADE_STATE_KEY))
            .await?
            .unwrap_or_default())
    }

    /// Persist the upgrade state
    pub async fn save_upgrade_state(&self, state: UpgradeState) -> StorageResult<()> {
        info!("Persisting group 0 upgrade state {:?}", state);
        self.put(&StorageKey::from(UPGRADE_STATE_KEY), &state).await
    }

    /// This node's server id, assigned at provisioning
    pub async fn load_local_server_id(&self) -> StorageResult<Option<ServerId>> {
        self.get(&StorageKey::from(LOCAL_SERVER_ID_KEY)).await
    }

    /// Persist this node's server id
    pub async fn save_local_server_id(&self, id: ServerId) -> StorageResult<()> {
        self.put(&StorageKey::from(LOCAL_SERVER_ID_KEY), &id).await
    }

    /// Whether the node finished joining the cluster at the data level before
    pub async fn bootstrap_complete(&self) -> StorageResult<bool> {
        Ok(self
            .get(&StorageKey::from(BOOTSTRAP_COMPLETE_KEY))
            .await?
            .unwrap_or(false))
    }

    /// Record that the node finished joining the cluster at the data level
    pub async fn set_bootstrap_complete(&self) -> StorageResult<()> {
        self.put(&StorageKey::from(BOOTSTRAP_COMPLETE_KEY), &true)
            .await
    }

    async fn get<T: DeserializeOwned>(&self, key: &StorageKey) -> StorageResult<Option<T>> {
        match self.storage.get(&self.namespace, key).await? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn put<T: Serialize>(&self, key: &StorageKey, value: &T) -> StorageResult<()> {
        self.storage
            .put(&self.namespace, key, encode(value)?)
            .await
    }
}

fn discovery_key(owner: &ServerId) -> StorageKey {
    StorageKey::from(format!("{DISCOVERY_PREFIX}{owner}"))
}

fn encode<T: Serialize>(value: &T) -> StorageResult<Bytes> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| StorageError::InvalidValue(e.to_string()))?;
    Ok(Bytes::from(buf))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| StorageError::InvalidValue(e.to_string()))
}
