//! Integration test: shard migration.
//!
//! A provider hands a completed shard to the node the chain picks; the
//! destination completes on chain and the source's copy expires.

use std::time::Duration;

use harbor_integration_tests::{IntegrationCluster, test_data_seeded, wait_until};
use harbor_store::ContentStore;
use harbor_types::chain::ShardStatus;
use harbor_types::events::MigrationCompleted;
use harbor_types::{Cid, MigrateState, ShardState};

/// Node 0 is the gateway, nodes 0 and 1 hold the shard, so the chain moves
/// node 1's copy to node 2.
#[tokio::test]
async fn test_migration_moves_custody_to_third_node() {
    let c = IntegrationCluster::new(3).await;
    let data = test_data_seeded(3000, 7);
    let cid = Cid::from_data(&data);

    let (order, _, _) = c.place_order(0, "data-m", &data, &[0, 1]).await;
    c.wait_for_state(0, &order, ShardState::Complete).await;
    c.wait_for_state(1, &order, ShardState::Complete).await;

    let mut done = c.node(1).engine.events().subscribe::<MigrationCompleted>();
    let results = c
        .node(1)
        .engine
        .migrate(&["data-m".to_string()])
        .await
        .unwrap();
    assert!(results["data-m"].starts_with("SUCCESS"));

    let event = tokio::time::timeout(Duration::from_secs(5), done.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.to, c.node(2).address);
    assert_eq!(event.cid, cid);

    let migrated = c.shard(2, &order).unwrap();
    assert_eq!(migrated.state, ShardState::Complete);
    let held = c.node(2).content.get(cid).await.unwrap().unwrap();
    assert_eq!(held.as_ref(), data.as_slice());

    let on_chain = c.chain().order(order.id).unwrap();
    let status_of = |address: &str| {
        on_chain
            .shards
            .iter()
            .find(|s| s.provider == address)
            .map(|s| s.status)
    };
    assert_eq!(status_of(&c.node(1).address), Some(ShardStatus::Terminated));
    assert_eq!(status_of(&c.node(2).address), Some(ShardStatus::Completed));
    assert_eq!(status_of(&c.node(0).address), Some(ShardStatus::Completed));

    let records = c.node(1).engine.migrate_list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, MigrateState::Complete);
    assert_eq!(records[0].to, c.node(2).address);

    // The chain no longer lists the source's copy.
    let report = c.node(1).engine.sweep_expired().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(c.shard(1, &order).unwrap().state, ShardState::Expired);
    assert!(!c.node(1).content.is_exist(cid).await.unwrap());

    // Holders that are still listed keep their copies.
    let report = c.node(0).engine.sweep_expired().await.unwrap();
    assert_eq!(report.expired, 0);
    assert!(c.node(0).content.is_exist(cid).await.unwrap());
}

/// The destination is unreachable for a while; the hand-off is retried
/// until it gets through.
#[tokio::test]
async fn test_migration_survives_destination_outage() {
    let c = IntegrationCluster::with_max_retries(3, 50).await;
    let data = test_data_seeded(1500, 8);

    let (order, _, _) = c.place_order(0, "data-o", &data, &[0, 1]).await;
    c.wait_for_state(1, &order, ShardState::Complete).await;

    c.kill_node(2).await;
    c.node(1)
        .engine
        .migrate(&["data-o".to_string()])
        .await
        .unwrap();

    wait_until(|| {
        c.node(1)
            .engine
            .migrate_list()
            .unwrap()
            .first()
            .is_some_and(|m| m.retries >= 2)
    })
    .await;
    let pending = &c.node(1).engine.migrate_list().unwrap()[0];
    assert_eq!(pending.state, MigrateState::TxSent);
    assert!(pending.last_error.contains("down"), "{}", pending.last_error);

    c.revive_node(2).await;
    wait_until(|| {
        c.node(1)
            .engine
            .migrate_list()
            .unwrap()
            .first()
            .is_some_and(|m| m.state == MigrateState::Complete)
    })
    .await;
    assert_eq!(
        c.shard(2, &order).map(|s| s.state),
        Some(ShardState::Complete)
    );
}

/// A migration in flight at restart is picked up by the new engine.
#[tokio::test]
async fn test_restart_resumes_migration() {
    let mut c = IntegrationCluster::with_max_retries(3, 50).await;
    let data = test_data_seeded(800, 9);

    let (order, _, _) = c.place_order(0, "data-r", &data, &[0, 1]).await;
    c.wait_for_state(1, &order, ShardState::Complete).await;

    c.kill_node(2).await;
    c.node(1)
        .engine
        .migrate(&["data-r".to_string()])
        .await
        .unwrap();
    wait_until(|| {
        c.node(1)
            .engine
            .migrate_list()
            .unwrap()
            .first()
            .is_some_and(|m| m.retries >= 1)
    })
    .await;

    c.restart_node(1).await;
    c.revive_node(2).await;
    wait_until(|| {
        c.node(1)
            .engine
            .migrate_list()
            .unwrap()
            .first()
            .is_some_and(|m| m.state == MigrateState::Complete)
    })
    .await;
    assert_eq!(
        c.shard(2, &order).map(|s| s.state),
        Some(ShardState::Complete)
    );
}
