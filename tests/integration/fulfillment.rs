//! Integration test: order fulfillment.
//!
//! Gateways stage content and announce orders; every named provider fetches,
//! verifies, completes on chain and notifies the gateway.

use std::collections::BTreeSet;

use harbor_integration_tests::{IntegrationCluster, test_data_seeded, wait_until};
use harbor_store::ContentStore;
use harbor_types::chain::ShardStatus;
use harbor_types::{Cid, ResponseCode, ShardState};

/// One order, three providers, one of them the gateway itself.
#[tokio::test]
async fn test_every_provider_completes() {
    let c = IntegrationCluster::new(3).await;
    let data = test_data_seeded(4096, 1);

    let (order, _, replies) = c.place_order(0, "data-1", &data, &[0, 1, 2]).await;
    for reply in replies {
        assert_eq!(reply.unwrap().code, ResponseCode::Success);
    }

    let cid = Cid::from_data(&data);
    for i in 0..3 {
        let shard = c.wait_for_state(i, &order, ShardState::Complete).await;
        assert_eq!(shard.cid, cid);
        assert_eq!(shard.size, data.len() as u64);
        let held = c.node(i).content.get(cid).await.unwrap().unwrap();
        assert_eq!(held.as_ref(), data.as_slice(), "node {i} holds other bytes");
    }

    let on_chain = c.chain().order(order.id).unwrap();
    assert!(
        on_chain
            .shards
            .iter()
            .all(|s| s.status == ShardStatus::Completed)
    );

    wait_until(|| c.node(0).gateway.completions().len() == 3).await;
    let notified: BTreeSet<String> = c
        .node(0)
        .gateway
        .completions()
        .into_iter()
        .map(|n| n.provider)
        .collect();
    let expected: BTreeSet<String> = (0..3).map(|i| c.node(i).address.clone()).collect();
    assert_eq!(notified, expected);
}

/// Many orders from different gateways, each to two providers.
#[tokio::test]
async fn test_concurrent_orders_from_many_gateways() {
    let c = IntegrationCluster::new(4).await;

    let mut placed = Vec::new();
    for i in 0..12 {
        let gateway = i % 4;
        let providers = [(i + 1) % 4, (i + 2) % 4];
        let data = test_data_seeded(1000 + i * 37, i as u32 + 10);
        let (order, _, replies) = c
            .place_order(gateway, &format!("data-{i}"), &data, &providers)
            .await;
        for reply in replies {
            assert_eq!(reply.unwrap().code, ResponseCode::Success);
        }
        placed.push((order, providers, data));
    }

    for (order, providers, data) in &placed {
        for &p in providers {
            c.wait_for_state(p, order, ShardState::Complete).await;
            let held = c
                .node(p)
                .content
                .get(Cid::from_data(data))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(held.as_ref(), data.as_slice());
        }
    }

    // Each gateway heard from both providers of each of its three orders.
    wait_until(|| (0..4).all(|g| c.node(g).gateway.completions().len() == 6)).await;
}

/// A provider not named by the order refuses the notice and records nothing.
#[tokio::test]
async fn test_unlisted_provider_refuses() {
    let c = IntegrationCluster::new(3).await;
    let data = test_data_seeded(512, 2);

    let (order, tx, _) = c.place_order(0, "data-x", &data, &[1]).await;
    let reply = c.announce(0, 2, &order, &tx).await.unwrap();
    assert_eq!(reply.code, ResponseCode::InvalidProvider);

    c.wait_for_state(1, &order, ShardState::Complete).await;
    assert!(c.shard(2, &order).is_none());
    assert!(c.node(2).engine.shard_list().unwrap().is_empty());
}

/// Announcing the same order twice leaves one shard record and one
/// completion.
#[tokio::test]
async fn test_repeated_announcement_completes_once() {
    let c = IntegrationCluster::new(2).await;
    let data = test_data_seeded(2048, 3);

    let (order, tx, _) = c.place_order(0, "data-d", &data, &[1]).await;
    let again = c.announce(0, 1, &order, &tx).await.unwrap();
    assert_eq!(again.code, ResponseCode::Success);

    c.wait_for_state(1, &order, ShardState::Complete).await;
    let again = c.announce(0, 1, &order, &tx).await.unwrap();
    assert_eq!(again.code, ResponseCode::Success);

    wait_until(|| !c.node(0).gateway.completions().is_empty()).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(c.node(1).engine.shard_list().unwrap().len(), 1);
    assert_eq!(c.node(0).gateway.completions().len(), 1);
}
