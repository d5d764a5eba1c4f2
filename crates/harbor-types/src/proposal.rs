//! Signed proposals that authorize reading shard content.

use serde::{Deserialize, Serialize};

use crate::OrderId;

/// A data owner's request to read content through a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryProposal {
    /// DID (or account address for fishmen) of the requester.
    pub owner: String,
    /// Data id or content address being queried.
    pub keyword: String,
    /// Node address of the gateway relaying the query.
    pub gateway: String,
    /// Last block height at which the proposal is honoured.
    pub last_valid_height: u64,
}

/// A node's statement that it relays requests through `relay_peer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayProposal {
    /// Node address vouching for the relay.
    pub node_address: String,
    /// Transport identity of the relaying peer.
    pub relay_peer: String,
    /// Transport identity of the eventual target.
    pub target_peer: String,
    pub order_id: OrderId,
}

/// Detached signature over the canonical encoding of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsSignature {
    /// Key id: the SID document version the signing key belongs to.
    pub kid: String,
    /// Raw 64-byte ed25519 signature.
    pub signature: Vec<u8>,
}
