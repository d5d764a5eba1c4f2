//! Integration test: recovery from outages.
//!
//! Gateways and the chain go away mid-flight; providers keep retrying,
//! survive restarts, and operators can revive abandoned shards.

use std::time::Duration;

use harbor_integration_tests::{IntegrationCluster, test_data_seeded, wait_until};
use harbor_store::ContentStore;
use harbor_types::events::ShardTerminated;
use harbor_types::{Cid, ResponseCode, ShardState};

/// The gateway is down when the order arrives; providers complete once it
/// is back.
#[tokio::test]
async fn test_gateway_outage_delays_completion() {
    let c = IntegrationCluster::with_max_retries(4, 50).await;
    let data = test_data_seeded(2500, 20);

    let (order, tx) = c.create_order(0, "data-g", &data, &[1, 2]).await;
    c.kill_node(0).await;
    // Node 3 relays the notice while the gateway is unreachable.
    for p in [1, 2] {
        let reply = c.announce(3, p, &order, &tx).await.unwrap();
        assert_eq!(reply.code, ResponseCode::Success);
    }

    wait_until(|| {
        [1, 2].iter().all(|&i| {
            c.shard(i, &order)
                .is_some_and(|s| s.retries >= 2 && s.state == ShardState::Validated)
        })
    })
    .await;
    let stuck = c.shard(1, &order).unwrap();
    assert!(stuck.last_error.contains("down"), "{}", stuck.last_error);

    c.revive_node(0).await;
    for i in [1, 2] {
        let shard = c.wait_for_state(i, &order, ShardState::Complete).await;
        assert!(shard.last_error.is_empty());
    }
    wait_until(|| c.node(0).gateway.completions().len() == 2).await;
}

/// Retries run out while the gateway is down; a fix after it returns
/// finishes the shard.
#[tokio::test]
async fn test_fix_revives_abandoned_shard() {
    let c = IntegrationCluster::with_max_retries(3, 2).await;
    let data = test_data_seeded(900, 21);
    let cid = Cid::from_data(&data);
    let mut terminated = c.node(1).engine.events().subscribe::<ShardTerminated>();

    let (order, tx) = c.create_order(0, "data-a", &data, &[1]).await;
    c.kill_node(0).await;
    c.announce(2, 1, &order, &tx).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), terminated.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.key.order_id, order.id);
    assert_eq!(c.shard(1, &order).unwrap().state, ShardState::Terminate);
    assert!(!c.node(1).content.is_exist(cid).await.unwrap());

    // A later notice does not bring it back.
    c.revive_node(0).await;
    c.announce(0, 1, &order, &tx).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(c.shard(1, &order).unwrap().state, ShardState::Terminate);

    let fixed = c.node(1).engine.shard_fix(order.id, cid).await.unwrap();
    assert_eq!(fixed.state, ShardState::Validated);
    assert_eq!(fixed.retries, 0);
    let shard = c.wait_for_state(1, &order, ShardState::Complete).await;
    assert!(shard.last_error.is_empty());
    assert!(c.node(1).content.is_exist(cid).await.unwrap());
}

/// A provider restarted mid-flight picks its pending shards back up.
#[tokio::test]
async fn test_restart_mid_flight() {
    let mut c = IntegrationCluster::with_max_retries(3, 50).await;

    let mut orders = Vec::new();
    for i in 0..4 {
        let data = test_data_seeded(600 + i * 10, 30 + i as u32);
        orders.push(c.create_order(0, &format!("data-{i}"), &data, &[1]).await);
    }
    c.kill_node(0).await;
    for (order, tx) in &orders {
        c.announce(2, 1, order, tx).await.unwrap();
    }
    wait_until(|| {
        orders
            .iter()
            .all(|(o, _)| c.shard(1, o).is_some_and(|s| s.retries >= 1))
    })
    .await;

    c.restart_node(1).await;
    c.revive_node(0).await;
    for (order, _) in &orders {
        c.wait_for_state(1, order, ShardState::Complete).await;
    }
    assert_eq!(c.keys_in_state(1, ShardState::Complete).len(), 4);
}

/// Completion broadcasts fail for a while after the content is fetched.
#[tokio::test]
async fn test_failed_broadcasts_are_retried() {
    let c = IntegrationCluster::with_max_retries(2, 50).await;
    let data = test_data_seeded(1200, 40);

    c.chain().fail_next_completes(3);
    let (order, _, _) = c.place_order(0, "data-c", &data, &[1]).await;

    let shard = c.wait_for_state(1, &order, ShardState::Complete).await;
    assert_eq!(c.chain().complete_calls(), 4);
    assert!(shard.complete_height > 0);
    assert!(!shard.complete_hash.is_empty());
    assert!(
        c.node(1)
            .content
            .is_exist(Cid::from_data(&data))
            .await
            .unwrap()
    );
}
