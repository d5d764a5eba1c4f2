//! Shared types and identifiers for Harbor.
//!
//! This crate defines the types used across the Harbor workspace:
//! the content address ([`Cid`]), the persisted shard and migration records
//! ([`ShardInfo`], [`MigrateInfo`]) with their typed keys, the protocol
//! [`ResponseCode`] taxonomy, and the on-chain records in [`chain`] and
//! signed proposals in [`proposal`].

pub mod chain;
pub mod events;
pub mod proposal;

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use chain::{
    Account, ChainTx, MigrateTxResponse, Order, OrderShard, ShardStatus, SidDocument, TxMessage,
    TxType,
};
pub use proposal::{JwsSignature, QueryProposal, RelayProposal};

/// Order identifier assigned by the chain.
pub type OrderId = u64;

// ---------------------------------------------------------------------------
// Content address
// ---------------------------------------------------------------------------

/// Content address of a shard: `blake3(shard_bytes)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Cid([u8; 32]);

impl Cid {
    /// Compute the content address of arbitrary data.
    pub fn from_data(data: &[u8]) -> Self {
        Self(blake3::hash(data).into())
    }

    /// Return the raw 32-byte representation.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Cid {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Cid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({self})")
    }
}

/// A string that is not a 64-character hex content address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed content address: {0:?}")]
pub struct ParseCidError(pub String);

impl FromStr for Cid {
    type Err = ParseCidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| ParseCidError(s.to_string()))?;
        Ok(Self(bytes))
    }
}

// ---------------------------------------------------------------------------
// Record keys
// ---------------------------------------------------------------------------

/// Key of a [`ShardInfo`] record: one per `(order_id, cid)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ShardKey {
    /// The order the shard belongs to.
    pub order_id: OrderId,
    /// Content address of the shard.
    pub cid: Cid,
}

impl ShardKey {
    /// Encoded length: 8-byte order id + 32-byte cid.
    pub const ENCODED_LEN: usize = 40;

    /// Create a key.
    pub fn new(order_id: OrderId, cid: Cid) -> Self {
        Self { order_id, cid }
    }

    /// Encode as `order_id (8 bytes BE) ++ cid (32 bytes)`.
    ///
    /// Big-endian keeps keys of one order adjacent and ordered.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..8].copy_from_slice(&self.order_id.to_be_bytes());
        out[8..].copy_from_slice(self.cid.as_bytes());
        out
    }

    /// Decode a key produced by [`ShardKey::encode`].
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let order_id = u64::from_be_bytes(bytes[..8].try_into().ok()?);
        let cid: [u8; 32] = bytes[8..].try_into().ok()?;
        Some(Self::new(order_id, Cid::from(cid)))
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.order_id, self.cid)
    }
}

/// Key of a [`MigrateInfo`] record: one per `(data_id, from)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MigrateKey {
    /// Logical data identifier being migrated.
    pub data_id: String,
    /// Provider handing the shard off.
    pub from: String,
}

impl MigrateKey {
    /// Create a key.
    pub fn new(data_id: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            data_id: data_id.into(),
            from: from.into(),
        }
    }

    /// Encode as `len(data_id) (2 bytes BE) ++ data_id ++ from`.
    pub fn encode(&self) -> Vec<u8> {
        let data_id = self.data_id.as_bytes();
        let mut out = Vec::with_capacity(2 + data_id.len() + self.from.len());
        out.extend_from_slice(&(data_id.len() as u16).to_be_bytes());
        out.extend_from_slice(data_id);
        out.extend_from_slice(self.from.as_bytes());
        out
    }

    /// Decode a key produced by [`MigrateKey::encode`].
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let len = u16::from_be_bytes(bytes.get(..2)?.try_into().ok()?) as usize;
        let data_id = std::str::from_utf8(bytes.get(2..2 + len)?).ok()?;
        let from = std::str::from_utf8(bytes.get(2 + len..)?).ok()?;
        Some(Self::new(data_id, from))
    }
}

impl fmt::Display for MigrateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.data_id, self.from)
    }
}

// ---------------------------------------------------------------------------
// Shard records
// ---------------------------------------------------------------------------

/// Progress of a shard through the fulfillment pipeline.
///
/// Ordered: `Validated < Stored < TxSent < Complete`. `Terminate` and
/// `Expired` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShardState {
    /// Assignment validated against the chain, nothing fetched yet.
    Validated,
    /// Content fetched, verified and persisted locally.
    Stored,
    /// Completion transaction broadcast and recorded.
    TxSent,
    /// Shard fully registered on this node.
    Complete,
    /// Retries exhausted or the order timed out.
    Terminate,
    /// Removed after the chain stopped listing the shard.
    Expired,
}

impl ShardState {
    /// Whether no further processing happens from this state.
    pub fn is_absorbing(self) -> bool {
        matches!(self, Self::Terminate | Self::Expired)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Forward moves along the pipeline and jumps into an absorbing state
    /// are legal; the only move out of an absorbing state is
    /// `Terminate -> Expired`.
    pub fn can_transition_to(self, next: ShardState) -> bool {
        match self {
            Self::Expired => false,
            Self::Terminate => next == Self::Expired,
            _ => next > self,
        }
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validated => "validated",
            Self::Stored => "stored",
            Self::TxSent => "tx-sent",
            Self::Complete => "complete",
            Self::Terminate => "terminate",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Persisted state of one shard this node is responsible for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub order_id: OrderId,
    pub data_id: String,
    pub cid: Cid,
    pub owner: String,
    /// Counterpart that supplies the bytes and receives the completion notice.
    pub gateway: String,
    pub operation: u8,
    pub shard_operation: u8,
    /// Shard id the chain assigned to this node's copy (0 until known).
    pub chain_shard_id: u64,
    pub complete_hash: String,
    pub complete_height: u64,
    pub size: u64,
    pub retries: u32,
    /// Unix millis before which the shard must not be retried.
    pub retry_at: u64,
    /// Block height after which the assignment is void (0 = never).
    pub expire_at: u64,
    pub last_error: String,
    pub state: ShardState,
    /// Unix millis of the last persisted change.
    pub updated_at: u64,
}

impl ShardInfo {
    /// A freshly validated shard with no progress yet.
    pub fn new(order_id: OrderId, cid: Cid) -> Self {
        Self {
            order_id,
            data_id: String::new(),
            cid,
            owner: String::new(),
            gateway: String::new(),
            operation: chain::OP_NEW,
            shard_operation: chain::OP_NEW,
            chain_shard_id: 0,
            complete_hash: String::new(),
            complete_height: 0,
            size: 0,
            retries: 0,
            retry_at: 0,
            expire_at: 0,
            last_error: String::new(),
            state: ShardState::Validated,
            updated_at: now_millis(),
        }
    }

    /// Key of this record.
    pub fn key(&self) -> ShardKey {
        ShardKey::new(self.order_id, self.cid)
    }

    /// Whether the order or shard operation means "extend storage of
    /// content this node already holds".
    pub fn is_renew(&self) -> bool {
        self.operation == chain::OP_RENEW || self.shard_operation == chain::OP_RENEW
    }

    /// Move to `next` if the transition is legal. Returns whether it moved.
    pub fn advance(&mut self, next: ShardState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.updated_at = now_millis();
        true
    }
}

/// Progress of an outbound migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MigrateState {
    /// Migrate transaction accepted, content not yet handed off.
    TxSent,
    /// Destination stored the content and completed the order.
    Complete,
}

impl fmt::Display for MigrateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TxSent => f.write_str("tx-sent"),
            Self::Complete => f.write_str("complete"),
        }
    }
}

/// Persisted state of one shard hand-off from `from` to `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateInfo {
    pub data_id: String,
    pub order_id: OrderId,
    pub from: String,
    pub to: String,
    pub cid: Cid,
    pub migrate_tx_hash: String,
    pub migrate_tx_height: u64,
    pub complete_tx_hash: String,
    pub complete_tx_height: u64,
    pub retries: u32,
    pub last_error: String,
    pub state: MigrateState,
}

impl MigrateInfo {
    /// Key of this record.
    pub fn key(&self) -> MigrateKey {
        MigrateKey::new(self.data_id.clone(), self.from.clone())
    }
}

// ---------------------------------------------------------------------------
// Protocol response codes
// ---------------------------------------------------------------------------

/// Result codes carried across the protocol boundary. `0` is success.
///
/// Serialized as the bare integer in every encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
#[repr(u32)]
pub enum ResponseCode {
    Success = 0,
    /// Malformed input.
    InvalidRequest = 1,
    /// Referenced transaction missing, failed or malformed.
    InvalidTx = 2,
    /// Local I/O, chain query or store failure.
    InternalErr = 3,
    /// The order does not list this node.
    InvalidProvider = 4,
    /// Content address malformed or not matching.
    InvalidShardCid = 5,
    /// The order's shard entry does not match the declared provider chain.
    InvalidOrderProvider = 6,
    /// The assignment targets another node.
    InvalidShardAssignee = 7,
    /// Requester claims auditor access but is not a fishmen node.
    InvalidFishmen = 8,
    /// A proposal signature did not verify.
    InvalidSignature = 9,
    /// The proposal's validity height has lapsed.
    ProposalExpired = 10,
}

impl ResponseCode {
    /// Numeric value sent on the wire.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Whether this is the success code.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<ResponseCode> for u32 {
    fn from(code: ResponseCode) -> Self {
        code.as_u32()
    }
}

/// A numeric code outside the known taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown response code {0}")]
pub struct UnknownResponseCode(pub u32);

impl TryFrom<u32> for ResponseCode {
    type Error = UnknownResponseCode;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use ResponseCode::*;
        const ALL: [ResponseCode; 11] = [
            Success,
            InvalidRequest,
            InvalidTx,
            InternalErr,
            InvalidProvider,
            InvalidShardCid,
            InvalidOrderProvider,
            InvalidShardAssignee,
            InvalidFishmen,
            InvalidSignature,
            ProposalExpired,
        ];
        ALL.get(value as usize)
            .copied()
            .ok_or(UnknownResponseCode(value))
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.as_u32())
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
