//! Voter changes, removal and leaving group 0

mod common;

use std::time::Duration;

use common::{TestCluster, TestNode, WAIT, addr, server_id};
use group0::{Group0Error, Group0Phase};
use group0_discovery::PeerExchangeResponse;
use group0_raft::test_helpers::Fault;
use group0_raft::{ConfigMember, Group0Server};
use group0_topology::PeerList;
use tokio::time::timeout;
use tracing_test::traced_test;

/// Node 1 creates the group, node 2 joins and is promoted
async fn two_nodes(cluster: &TestCluster) -> (TestNode, TestNode) {
    let first = cluster.spawn(1, 1).await;
    cluster.bootstrap(&first, vec![]).await;
    let second = cluster.spawn(2, 2).await;
    cluster.bootstrap(&second, vec![addr(1)]).await;
    (first, second)
}

#[tokio::test]
#[traced_test]
async fn test_promotion_retried_when_commit_status_unknown() {
    let cluster = TestCluster::new();
    let first = cluster.spawn(1, 1).await;
    cluster.bootstrap(&first, vec![]).await;
    let group0_id = first.group0.group0_server().unwrap().group0_id();

    let second = cluster.spawn(2, 2).await;
    second.group0.setup_group0(vec![addr(1)], None).await.unwrap();
    let attempts_before = cluster.raft.modify_attempts();

    // The first promotion lands but its outcome is reported unknown
    cluster.raft.inject_fault(Fault::CommitUnknown { applied: true });
    second.group0.finish_setup_after_join().await.unwrap();

    assert_eq!(cluster.raft.modify_attempts() - attempts_before, 2);
    let promotion = ConfigMember::voter(second.id, second.address);
    let promotions = cluster
        .raft
        .config_log(&group0_id)
        .into_iter()
        .filter(|change| change.add.contains(&promotion))
        .count();
    assert_eq!(promotions, 1);

    assert!(second.group0.wait_for_raft().await.unwrap());
    assert!(second.group0.is_member(&second.id, true).unwrap());
}

#[tokio::test]
#[traced_test]
async fn test_promotion_applied_on_retry_after_lost_commit() {
    let cluster = TestCluster::new();
    let first = cluster.spawn(1, 1).await;
    cluster.bootstrap(&first, vec![]).await;
    let second = cluster.spawn(2, 2).await;
    second.group0.setup_group0(vec![addr(1)], None).await.unwrap();

    cluster.raft.inject_fault(Fault::CommitUnknown { applied: false });
    cluster.raft.inject_fault(Fault::CommitUnknown { applied: false });
    second.group0.finish_setup_after_join().await.unwrap();

    assert!(second.group0.wait_for_raft().await.unwrap());
    assert!(first.group0.is_member(&second.id, true).unwrap());
}

#[tokio::test]
#[traced_test]
async fn test_rejected_change_is_not_retried() {
    let cluster = TestCluster::new();
    let first = cluster.spawn(1, 1).await;
    cluster.bootstrap(&first, vec![]).await;
    let second = cluster.spawn(2, 2).await;
    second.group0.setup_group0(vec![addr(1)], None).await.unwrap();
    let attempts_before = cluster.raft.modify_attempts();

    cluster.raft.inject_fault(Fault::Reject("no quorum".to_string()));
    let result = second.group0.finish_setup_after_join().await;

    assert!(matches!(result, Err(Group0Error::Raft(_))));
    assert_eq!(cluster.raft.modify_attempts() - attempts_before, 1);
}

#[tokio::test]
#[traced_test]
async fn test_membership_calls_require_wait_for_raft() {
    let cluster = TestCluster::new();
    let node = cluster.spawn(1, 1).await;
    node.group0.setup_group0(vec![], None).await.unwrap();
    node.group0.finish_setup_after_join().await.unwrap();

    assert!(matches!(
        node.group0.is_member(&node.id, true),
        Err(Group0Error::InvalidState(_))
    ));
    assert!(matches!(
        node.group0.make_voter(node.id).await,
        Err(Group0Error::InvalidState(_))
    ));

    assert!(node.group0.wait_for_raft().await.unwrap());
    assert!(node.group0.is_member(&node.id, true).unwrap());
}

#[tokio::test]
#[traced_test]
async fn test_voter_changes_are_idempotent() {
    let cluster = TestCluster::new();
    let (first, second) = two_nodes(&cluster).await;
    let group0_id = first.group0.group0_server().unwrap().group0_id();
    let log_len = cluster.raft.config_log(&group0_id).len();

    first.group0.make_voter(second.id).await.unwrap();
    assert_eq!(cluster.raft.config_log(&group0_id).len(), log_len);

    first.group0.make_nonvoter(second.id).await.unwrap();
    assert!(!first.group0.is_member(&second.id, true).unwrap());
    assert!(first.group0.is_member(&second.id, false).unwrap());

    first.group0.make_nonvoter(second.id).await.unwrap();
    assert_eq!(cluster.raft.config_log(&group0_id).len(), log_len + 1);

    first.group0.make_voter(second.id).await.unwrap();
    assert!(first.group0.is_member(&second.id, true).unwrap());
}

#[tokio::test]
#[traced_test]
async fn test_voter_changes_for_unknown_ids() {
    let cluster = TestCluster::new();
    let (first, _second) = two_nodes(&cluster).await;
    let stranger = server_id(99);

    first.group0.make_nonvoter(stranger).await.unwrap();
    assert!(matches!(
        first.group0.make_voter(stranger).await,
        Err(Group0Error::InvalidState(_))
    ));
    first.group0.remove_from_raft_config(stranger).await.unwrap();
    assert!(!first.group0.is_member(&stranger, false).unwrap());
}

#[tokio::test]
#[traced_test]
async fn test_become_nonvoter() {
    let cluster = TestCluster::new();
    let (first, second) = two_nodes(&cluster).await;

    second.group0.become_nonvoter().await.unwrap();

    assert!(first.group0.is_member(&second.id, false).unwrap());
    assert!(!first.group0.is_member(&second.id, true).unwrap());
}

#[tokio::test]
#[traced_test]
async fn test_remove_other_node() {
    let cluster = TestCluster::new();
    let (first, second) = two_nodes(&cluster).await;
    assert_eq!(first.group0.address_map().find(&second.id), None);
    first.group0.address_map().add_or_update(second.id, second.address);

    first.group0.remove_from_group0(second.id).await.unwrap();

    assert!(!first.group0.is_member(&second.id, false).unwrap());
    assert_eq!(first.group0.address_map().find(&second.id), None);
    // Removing twice is harmless
    first.group0.remove_from_group0(second.id).await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn test_remove_self_is_rejected() {
    let cluster = TestCluster::new();
    let (first, _second) = two_nodes(&cluster).await;

    let result = first.group0.remove_from_group0(first.id).await;
    assert!(matches!(result, Err(Group0Error::InvalidState(_))));
    assert!(first.group0.is_member(&first.id, true).unwrap());
}

#[tokio::test]
#[traced_test]
async fn test_leave_group0() {
    let cluster = TestCluster::new();
    let (first, second) = two_nodes(&cluster).await;
    let group0_id = first.group0.group0_server().unwrap().group0_id();

    second.group0.leave_group0().await.unwrap();

    assert_eq!(second.group0.phase().await, Group0Phase::Left(group0_id));
    assert!(!first.group0.is_member(&second.id, false).unwrap());
    assert_eq!(
        second.group0.peer_exchange(PeerList::new()).await.unwrap(),
        PeerExchangeResponse::NotDiscovering
    );

    // Leaving again is a no-op
    second.group0.leave_group0().await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn test_leave_after_removal_skips_the_change() {
    let cluster = TestCluster::new();
    let (first, second) = two_nodes(&cluster).await;
    let group0_id = first.group0.group0_server().unwrap().group0_id();
    first.group0.remove_from_group0(second.id).await.unwrap();
    let attempts_before = cluster.raft.modify_attempts();

    second.group0.leave_group0().await.unwrap();

    assert_eq!(cluster.raft.modify_attempts(), attempts_before);
    assert_eq!(second.group0.phase().await, Group0Phase::Left(group0_id));
}

#[tokio::test]
#[traced_test]
async fn test_leave_without_leader_waits_for_abort() {
    let cluster = TestCluster::new();
    let (_first, second) = two_nodes(&cluster).await;
    cluster.raft.set_leaderless(true);

    let group0 = second.group0.clone();
    let leaving = tokio::spawn(async move { group0.leave_group0().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!leaving.is_finished());

    second.group0.abort().await;
    let result = timeout(WAIT, leaving).await.unwrap().unwrap();
    assert!(matches!(result, Err(Group0Error::Aborted)));
    assert!(matches!(second.group0.phase().await, Group0Phase::Member(_)));
}
