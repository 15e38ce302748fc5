//! Snapback controller scenarios: probe classification, unhealthy-secondary
//! replacement, and the full behind-secondary convergence circle.

use std::sync::Arc;
use std::time::Duration;

use tracing_test::traced_test;

use super::shared::cancel_channel;
use super::shared::spawn_test_node;
use crate::chain::DevChainClient;
use crate::coordination::keys;
use crate::models::replica::ReplicaSetRecord;
use crate::snapback_loop::SnapbackLoop;

const WALLET: &str = "0xbb22";

/// A loopback port nothing listens on; probes fail with connection refused.
const DEAD_ENDPOINT: &str = "http://127.0.0.1:9";

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn unreachable_secondary_is_replaced_and_new_secondary_converges() {
    let chain = Arc::new(DevChainClient::new());
    chain.deploy_registry().await;

    let primary = spawn_test_node(1, &chain).await;
    chain.add_content_node(2, DEAD_ENDPOINT).await;
    let healthy_secondary = spawn_test_node(3, &chain).await;
    let replacement = spawn_test_node(4, &chain).await;

    chain
        .set_replica_set(
            WALLET,
            ReplicaSetRecord {
                primary_sp_id: 1,
                secondary1_sp_id: 2,
                secondary2_sp_id: 3,
            },
        )
        .await;

    // one committed row so the primary has something to replicate
    primary.seed_audius_user(WALLET).await;
    let (_cancel_tx, cancel_rx) = cancel_channel();
    healthy_secondary
        .executor()
        .sync_wallet(WALLET, &primary.endpoint, false, &cancel_rx)
        .await
        .unwrap();
    assert_eq!(0, healthy_secondary.clock(WALLET).await);

    // five consecutive failed probes trip the replacement proposal
    let snapback = SnapbackLoop::new(primary.state.clone());
    for probe in 1..=4i64 {
        snapback.converge_user(WALLET, 1).await.unwrap();
        assert_eq!(
            probe,
            primary
                .state
                .coordination
                .counter(&keys::unhealthy(WALLET, 2))
                .await
        );
        assert_eq!(
            Some(ReplicaSetRecord {
                primary_sp_id: 1,
                secondary1_sp_id: 2,
                secondary2_sp_id: 3,
            }),
            chain.replica_set(WALLET).await.unwrap()
        );
    }
    snapback.converge_user(WALLET, 1).await.unwrap();

    // the chain confirmed the swap: sp 2 out, sp 4 in
    assert_eq!(
        Some(ReplicaSetRecord {
            primary_sp_id: 1,
            secondary1_sp_id: 4,
            secondary2_sp_id: 3,
        }),
        chain.replica_set(WALLET).await.unwrap()
    );
    assert_eq!(
        0,
        primary
            .state
            .coordination
            .counter(&keys::unhealthy(WALLET, 2))
            .await
    );

    // the next tick probes the new secondary, sees it behind, and requests
    // a sync; the replacement converges to the primary's clock
    snapback.converge_user(WALLET, 1).await.unwrap();
    let mut converged = false;
    for _ in 0..200 {
        if replacement.clock(WALLET).await == primary.clock(WALLET).await {
            converged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(converged, "replacement secondary never caught up");
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn reconfig_proposals_are_idempotent() {
    let chain = Arc::new(DevChainClient::new());
    chain.deploy_registry().await;
    let primary = spawn_test_node(1, &chain).await;
    chain.add_content_node(2, DEAD_ENDPOINT).await;
    let healthy_secondary = spawn_test_node(3, &chain).await;
    let _replacement = spawn_test_node(4, &chain).await;
    let _replacement_b = spawn_test_node(5, &chain).await;

    chain
        .set_replica_set(
            WALLET,
            ReplicaSetRecord {
                primary_sp_id: 1,
                secondary1_sp_id: 2,
                secondary2_sp_id: 3,
            },
        )
        .await;
    primary.seed_audius_user(WALLET).await;
    let (_cancel_tx, cancel_rx) = cancel_channel();
    healthy_secondary
        .executor()
        .sync_wallet(WALLET, &primary.endpoint, false, &cancel_rx)
        .await
        .unwrap();

    let snapback = SnapbackLoop::new(primary.state.clone());
    for _ in 0..5 {
        snapback.converge_user(WALLET, 1).await.unwrap();
    }
    let after_first = chain.replica_set(WALLET).await.unwrap().unwrap();
    assert!(!after_first.contains(2));

    // further ticks never propose again for the replaced pair
    for _ in 0..3 {
        snapback.converge_user(WALLET, 1).await.unwrap();
    }
    assert!(
        primary
            .state
            .coordination
            .get(&keys::reconfig(WALLET, 2))
            .await
            .is_some(),
        "the proposal marker parks the replaced pair"
    );
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn users_primaried_elsewhere_are_ignored() {
    let chain = Arc::new(DevChainClient::new());
    chain.deploy_registry().await;
    let node = spawn_test_node(1, &chain).await;
    chain.add_content_node(2, DEAD_ENDPOINT).await;
    chain.add_content_node(9, DEAD_ENDPOINT).await;

    chain
        .set_replica_set(
            WALLET,
            ReplicaSetRecord {
                primary_sp_id: 9,
                secondary1_sp_id: 1,
                secondary2_sp_id: 2,
            },
        )
        .await;
    node.seed_audius_user(WALLET).await;

    let snapback = SnapbackLoop::new(node.state.clone());
    snapback.converge_user(WALLET, 1).await.unwrap();

    // no probes were counted: this node is a secondary for the user
    assert_eq!(
        0,
        node.state
            .coordination
            .counter(&keys::unhealthy(WALLET, 2))
            .await
    );
}
