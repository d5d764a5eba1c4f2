//! Chaos test: flapping gateway and provider.
//!
//! 4-node cluster. The gateway and one provider drop off the network and
//! come back at random while orders keep arriving. Once the network
//! settles, every assigned shard must complete with intact content.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use harbor_integration_tests::{IntegrationCluster, test_data_seeded, wait_until};
use harbor_store::ContentStore;
use harbor_types::{Cid, ShardState};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time;

const ORDERS: usize = 20;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flapping_nodes_lose_nothing() {
    // Enough retries that no shard is abandoned during the chaos phase.
    let c = Arc::new(IntegrationCluster::with_max_retries(4, 1000).await);
    let stop = Arc::new(AtomicBool::new(false));

    // --- Flapper: toggles nodes 0 (gateway) and 2 (provider) ---
    let flapper = {
        let c = c.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(0x4841_5242);
            let mut flips = 0u32;
            while !stop.load(Ordering::Relaxed) {
                let victim = if rng.random_bool(0.5) { 0 } else { 2 };
                c.kill_node(victim).await;
                time::sleep(Duration::from_millis(rng.random_range(10..40))).await;
                c.revive_node(victim).await;
                time::sleep(Duration::from_millis(rng.random_range(5..20))).await;
                flips += 1;
            }
            flips
        })
    };

    // --- Orders from gateway 0, announced by node 3 ---
    let mut placed = Vec::with_capacity(ORDERS);
    for i in 0..ORDERS {
        let data = test_data_seeded(700 + i * 53, 1000 + i as u32);
        let providers = if i % 2 == 0 { [1, 2] } else { [2, 3] };
        let (order, tx) = c
            .create_order(0, &format!("chaos-{i}"), &data, &providers)
            .await;
        for &p in &providers {
            // The target may be down; keep announcing until it answers.
            loop {
                match c.announce(3, p, &order, &tx).await {
                    Ok(reply) => {
                        assert!(reply.code.is_success(), "{}", reply.message);
                        break;
                    }
                    Err(_) => time::sleep(Duration::from_millis(5)).await,
                }
            }
        }
        placed.push((order, providers, data));
        time::sleep(Duration::from_millis(15)).await;
    }

    time::sleep(Duration::from_millis(300)).await;
    stop.store(true, Ordering::Relaxed);
    let flips = flapper.await.unwrap();
    assert!(flips > 0);
    c.revive_node(0).await;
    c.revive_node(2).await;

    // --- Verification ---
    for (order, providers, data) in &placed {
        for &p in providers {
            let shard = c.wait_for_state(p, order, ShardState::Complete).await;
            let held = c
                .node(p)
                .content
                .get(Cid::from_data(data))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(held.as_ref(), data.as_slice(), "{} on node {p}", shard.key());
        }
    }
    for p in 1..4 {
        assert!(c.keys_in_state(p, ShardState::Terminate).is_empty());
    }
    let on_chain = (0..ORDERS as u64)
        .filter_map(|i| c.chain().order(i + 1))
        .flat_map(|o| o.shards)
        .filter(|s| s.status == harbor_types::chain::ShardStatus::Completed)
        .count();
    assert_eq!(on_chain, ORDERS * 2);
}
