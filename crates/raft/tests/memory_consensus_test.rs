//! Behaviour of the in-memory consensus engine used by group 0 tests

use std::net::SocketAddr;
use std::time::Duration;

use group0_raft::test_helpers::{Fault, MemoryConsensus, MemoryRaftCluster};
use group0_raft::{ConfigMember, ConsensusEngine, Group0Server, RaftError};
use group0_topology::{DiscoveryPeer, GroupId, ServerId};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

fn addr(i: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, i], 7000))
}

#[tokio::test]
#[traced_test]
async fn test_create_then_join() {
    let cluster = MemoryRaftCluster::new();
    let engine = MemoryConsensus::new(cluster.clone());
    let group0_id = GroupId::new_random();
    let leader = ConfigMember::voter(ServerId::new_random(), addr(1));

    let server = engine.create_group(group0_id, leader).await.unwrap();
    assert!(server.configuration().contains(&leader.id, true));

    let joiner = ConfigMember::nonvoter(ServerId::new_random(), addr(2));
    let joined = engine
        .join_group(
            group0_id,
            joiner,
            DiscoveryPeer::new(leader.id, leader.address),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let config = joined.configuration();
    assert_eq!(config.len(), 2);
    assert!(config.contains(&joiner.id, false));
    assert!(!config.contains(&joiner.id, true));
    assert_eq!(engine.create_calls(), 1);
    assert_eq!(engine.join_calls(), 1);

    // The same group cannot be created twice
    assert!(matches!(
        engine.create_group(group0_id, leader).await,
        Err(RaftError::Rejected(_))
    ));
}

#[tokio::test]
#[traced_test]
async fn test_faults_apply_in_order() {
    let cluster = MemoryRaftCluster::new();
    let engine = MemoryConsensus::new(cluster.clone());
    let group0_id = GroupId::new_random();
    let me = ConfigMember::voter(ServerId::new_random(), addr(1));
    let server = engine.create_group(group0_id, me).await.unwrap();
    let abort = CancellationToken::new();

    let other = ConfigMember::nonvoter(ServerId::new_random(), addr(2));
    cluster.inject_fault(Fault::CommitUnknown { applied: true });
    cluster.inject_fault(Fault::Reject("busy".to_string()));

    assert!(matches!(
        server.modify_config(vec![other], vec![], &abort).await,
        Err(RaftError::CommitStatusUnknown)
    ));
    // Applied despite the error
    assert!(server.configuration().contains(&other.id, false));

    assert!(matches!(
        server.modify_config(vec![], vec![other.id], &abort).await,
        Err(RaftError::Rejected(_))
    ));
    server
        .modify_config(vec![other], vec![], &abort)
        .await
        .unwrap();

    // create + one effective add; the repeated add changed nothing
    assert_eq!(cluster.config_log(&group0_id).len(), 2);
    assert_eq!(cluster.modify_attempts(), 3);
}

#[tokio::test]
#[traced_test]
async fn test_leaderless_blocks_until_cancelled() {
    let cluster = MemoryRaftCluster::new();
    let engine = MemoryConsensus::new(cluster.clone());
    let me = ConfigMember::voter(ServerId::new_random(), addr(1));
    let server = engine
        .create_group(GroupId::new_random(), me)
        .await
        .unwrap();

    cluster.set_leaderless(true);
    let abort = CancellationToken::new();
    let canceller = abort.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    assert!(matches!(
        server.read_barrier(&abort).await,
        Err(RaftError::Aborted)
    ));
    assert_eq!(cluster.read_barriers(), 0);
}

#[tokio::test]
#[traced_test]
async fn test_aborted_server_refuses_work() {
    let cluster = MemoryRaftCluster::new();
    let engine = MemoryConsensus::new(cluster.clone());
    let group0_id = GroupId::new_random();
    let id = ServerId::new_random();
    engine
        .create_group(group0_id, ConfigMember::voter(id, addr(1)))
        .await
        .unwrap();

    let restarted = engine.start_existing(group0_id, id).await.unwrap();
    restarted.abort().await;
    assert!(restarted.is_aborted());
    assert!(matches!(
        restarted.read_barrier(&CancellationToken::new()).await,
        Err(RaftError::Aborted)
    ));

    assert!(matches!(
        engine.start_existing(GroupId::new_random(), id).await,
        Err(RaftError::GroupNotFound(_))
    ));
}
