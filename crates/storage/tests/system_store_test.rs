//! Tests for the typed system records

use std::net::SocketAddr;

use group0_storage::{StorageError, SystemStore, UpgradeState};
use group0_storage_memory::MemoryStorage;
use group0_topology::{DiscoveryPeer, GroupId, ServerId};
use tracing_test::traced_test;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[tokio::test]
#[traced_test]
async fn test_discovery_peers_are_keyed_by_owner() {
    let store = SystemStore::new(MemoryStorage::new());
    let owner = ServerId::new_random();
    let other_owner = ServerId::new_random();

    let peer = DiscoveryPeer::new(ServerId::new_random(), addr(1));
    store.append_discovery_peers(&owner, &[peer]).await.unwrap();

    let loaded = store.load_discovery_peers(&owner).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(loaded.contains_address(&addr(1)));

    assert!(
        store
            .load_discovery_peers(&other_owner)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
#[traced_test]
async fn test_append_merges_with_stored_peers() {
    let store = SystemStore::new(MemoryStorage::new());
    let owner = ServerId::new_random();

    store
        .append_discovery_peers(&owner, &[DiscoveryPeer::unidentified(addr(1))])
        .await
        .unwrap();

    let id = ServerId::new_random();
    store
        .append_discovery_peers(
            &owner,
            &[
                DiscoveryPeer::new(id, addr(1)),
                DiscoveryPeer::unidentified(addr(2)),
            ],
        )
        .await
        .unwrap();

    let loaded = store.load_discovery_peers(&owner).await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.get_by_address(&addr(1)).unwrap().id, id);
}

#[tokio::test]
#[traced_test]
async fn test_group0_id_is_write_once() {
    let store = SystemStore::new(MemoryStorage::new());
    assert_eq!(store.load_group0_id().await.unwrap(), None);

    let id = GroupId::new_random();
    store.persist_group0_id(id).await.unwrap();
    // Same value again is fine
    store.persist_group0_id(id).await.unwrap();

    let err = store
        .persist_group0_id(GroupId::new_random())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::AlreadySet(_)));
    assert_eq!(store.load_group0_id().await.unwrap(), Some(id));
}

#[tokio::test]
#[traced_test]
async fn test_records_survive_reopen() {
    let storage = MemoryStorage::new();
    let id = ServerId::new_random();
    {
        let store = SystemStore::new(storage.clone());
        store.save_local_server_id(id).await.unwrap();
        store
            .save_upgrade_state(UpgradeState::Synchronize)
            .await
            .unwrap();
        store.set_bootstrap_complete().await.unwrap();
    }

    let reopened = SystemStore::new(storage);
    assert_eq!(reopened.load_local_server_id().await.unwrap(), Some(id));
    assert_eq!(
        reopened.load_upgrade_state().await.unwrap(),
        UpgradeState::Synchronize
    );
    assert!(reopened.bootstrap_complete().await.unwrap());
}

#[tokio::test]
#[traced_test]
async fn test_defaults_for_fresh_node() {
    let store = SystemStore::new(MemoryStorage::new());
    assert_eq!(
        store.load_upgrade_state().await.unwrap(),
        UpgradeState::UsePreRaftProcedures
    );
    assert!(!store.bootstrap_complete().await.unwrap());
    assert_eq!(store.load_local_server_id().await.unwrap(), None);
}
