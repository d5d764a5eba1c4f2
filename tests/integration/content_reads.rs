//! Integration test: authorized content reads.
//!
//! Owners read stored content through their gateway under a signed query
//! proposal, directly or through a relay node; auditors read under a relay
//! proposal of their own. Everything else is refused before any content
//! leaves the provider.

use ed25519_dalek::SigningKey;
use harbor_engine::auth;
use harbor_integration_tests::{IntegrationCluster, test_data_seeded};
use harbor_net::ShardLoadRequest;
use harbor_types::{Account, Cid, QueryProposal, RelayProposal, ResponseCode, ShardState};

const OWNER: &str = "did:harbor:owner";
const OWNER_KID: &str = "did:harbor:owner#key-1";

fn owner_key() -> SigningKey {
    SigningKey::from_bytes(&[11u8; 32])
}

fn account_key(i: u8) -> SigningKey {
    SigningKey::from_bytes(&[40 + i; 32])
}

/// Three nodes; node 1 holds `data-r` staged on gateway node 0. Every node
/// has an account key on chain.
async fn setup() -> (IntegrationCluster, Cid, Vec<u8>) {
    let c = IntegrationCluster::new(3).await;
    for i in 0..3 {
        c.chain().put_account(Account {
            address: c.node(i).address.clone(),
            public_key: account_key(i as u8).verifying_key().to_bytes(),
        });
    }
    c.register_owner(OWNER, OWNER_KID, &owner_key());

    let data = test_data_seeded(1800, 50);
    let (order, tx) = c.create_owned_order(OWNER, 0, "data-r", &data, &[1]).await;
    let reply = c.announce(0, 1, &order, &tx).await.unwrap();
    assert_eq!(reply.code, ResponseCode::Success, "{}", reply.message);
    c.wait_for_state(1, &order, ShardState::Complete).await;
    (c, Cid::from_data(&data), data)
}

fn relayed(c: &IntegrationCluster, mut req: ShardLoadRequest, relay: usize) -> ShardLoadRequest {
    let proposal = RelayProposal {
        node_address: c.node(relay).address.clone(),
        relay_peer: c.node(relay).peer.clone(),
        target_peer: c.node(1).peer.clone(),
        order_id: 1,
    };
    req.relay_signature = Some(
        auth::sign(&account_key(relay as u8), &proposal.node_address, &proposal).unwrap(),
    );
    req.relay = Some(proposal);
    req
}

#[tokio::test]
async fn test_owner_reads_through_gateway() {
    let (c, cid, data) = setup().await;
    let height = c.chain().height();
    let req = c.owner_load_request(0, OWNER, OWNER_KID, &owner_key(), cid, height + 10);

    let resp = c
        .node(0)
        .transport
        .request_shard_load(&c.node(1).peer, req)
        .await
        .unwrap();
    assert_eq!(resp.code, ResponseCode::Success, "{}", resp.message);
    assert_eq!(resp.content, data);
}

#[tokio::test]
async fn test_owner_reads_through_relay() {
    let (c, cid, data) = setup().await;
    let height = c.chain().height();
    let req = c.owner_load_request(0, OWNER, OWNER_KID, &owner_key(), cid, height + 10);
    let req = relayed(&c, req, 2);

    let resp = c
        .node(2)
        .transport
        .request_shard_load(&c.node(1).peer, req)
        .await
        .unwrap();
    assert_eq!(resp.code, ResponseCode::Success, "{}", resp.message);
    assert_eq!(resp.content, data);
}

#[tokio::test]
async fn test_reads_refused() {
    let (c, cid, _) = setup().await;
    let height = c.chain().height();

    // Sent by a node other than the gateway, without a relay proposal.
    let req = c.owner_load_request(0, OWNER, OWNER_KID, &owner_key(), cid, height + 10);
    let resp = c
        .node(2)
        .transport
        .request_shard_load(&c.node(1).peer, req)
        .await
        .unwrap();
    assert_eq!(resp.code, ResponseCode::InvalidRequest);
    assert!(resp.content.is_empty());

    // Signed with a key the owner never published.
    let stranger = SigningKey::from_bytes(&[99u8; 32]);
    let req = c.owner_load_request(0, OWNER, OWNER_KID, &stranger, cid, height + 10);
    let resp = c
        .node(0)
        .transport
        .request_shard_load(&c.node(1).peer, req)
        .await
        .unwrap();
    assert_eq!(resp.code, ResponseCode::InvalidSignature);

    // Relay proposal signed by someone other than the relay node.
    let req = c.owner_load_request(0, OWNER, OWNER_KID, &owner_key(), cid, height + 10);
    let mut req = relayed(&c, req, 2);
    if let Some(relay) = &req.relay {
        req.relay_signature = Some(auth::sign(&account_key(0), "forged", relay).unwrap());
    }
    let resp = c
        .node(2)
        .transport
        .request_shard_load(&c.node(1).peer, req)
        .await
        .unwrap();
    assert_eq!(resp.code, ResponseCode::InvalidSignature);

    // Proposal lapsed.
    let req = c.owner_load_request(0, OWNER, OWNER_KID, &owner_key(), cid, height + 1);
    c.chain().advance_height(5);
    let resp = c
        .node(0)
        .transport
        .request_shard_load(&c.node(1).peer, req)
        .await
        .unwrap();
    assert_eq!(resp.code, ResponseCode::ProposalExpired);
    assert!(resp.content.is_empty());
}

#[tokio::test]
async fn test_auditor_reads() {
    let (c, cid, data) = setup().await;
    let auditor = c.node(2).address.clone();

    let proposal = QueryProposal {
        owner: auditor.clone(),
        keyword: cid.to_string(),
        gateway: auditor.clone(),
        last_valid_height: c.chain().height() + 10,
    };
    let req = relayed(
        &c,
        ShardLoadRequest {
            cid,
            signature: auth::sign(&account_key(2), &auditor, &proposal).unwrap(),
            proposal,
            relay: None,
            relay_signature: None,
        },
        2,
    );

    // Not yet registered as an auditor.
    let resp = c
        .node(2)
        .transport
        .request_shard_load(&c.node(1).peer, req.clone())
        .await
        .unwrap();
    assert_eq!(resp.code, ResponseCode::InvalidFishmen);

    c.chain().add_fishmen(&auditor);
    let resp = c
        .node(2)
        .transport
        .request_shard_load(&c.node(1).peer, req)
        .await
        .unwrap();
    assert_eq!(resp.code, ResponseCode::Success, "{}", resp.message);
    assert_eq!(resp.content, data);
}

#[tokio::test]
async fn test_authorized_read_of_unheld_content() {
    let (c, _, _) = setup().await;
    let missing = Cid::from_data(b"never stored");
    let height = c.chain().height();
    let req = c.owner_load_request(0, OWNER, OWNER_KID, &owner_key(), missing, height + 10);

    let resp = c
        .node(0)
        .transport
        .request_shard_load(&c.node(1).peer, req)
        .await
        .unwrap();
    assert_eq!(resp.code, ResponseCode::InvalidRequest);
    assert!(resp.content.is_empty());
}

/// A second owner's content on the same provider stays out of reach of
/// the first owner's valid proposal.
#[tokio::test]
async fn test_owner_cannot_read_another_owners_content() {
    let (c, _, _) = setup().await;
    let other = test_data_seeded(700, 51);
    let (order, tx) = c
        .create_owned_order("did:harbor:other", 0, "data-o", &other, &[1])
        .await;
    c.announce(0, 1, &order, &tx).await.unwrap();
    c.wait_for_state(1, &order, ShardState::Complete).await;

    let height = c.chain().height();
    let req = c.owner_load_request(
        0,
        OWNER,
        OWNER_KID,
        &owner_key(),
        Cid::from_data(&other),
        height + 10,
    );
    let resp = c
        .node(0)
        .transport
        .request_shard_load(&c.node(1).peer, req)
        .await
        .unwrap();
    assert_eq!(resp.code, ResponseCode::InvalidRequest);
    assert!(resp.content.is_empty());
}
