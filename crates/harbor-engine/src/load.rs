//! Authorized reads of stored content.

use harbor_net::{ShardLoadRequest, ShardLoadResponse};
use harbor_types::{JwsSignature, QueryProposal, ResponseCode, ShardInfo, ShardState};
use serde::Serialize;
use tracing::debug;

use crate::auth;
use crate::engine::ShardEngine;
use crate::error::Rejection;

impl ShardEngine {
    /// Serve content after the request's proposals check out and a held
    /// shard matches them. Nothing is read from the store before that.
    ///
    /// Owners only read their own shards; auditors only read shards of the
    /// order their relay proposal names. Either way the signed keyword must
    /// name the shard's data id or content address.
    pub(crate) async fn load(
        &self,
        remote_peer: &str,
        req: ShardLoadRequest,
    ) -> Result<ShardLoadResponse, Rejection> {
        let candidates = if req.proposal.owner == req.proposal.gateway {
            let order_id = self.authorize_fishmen(&req).await?;
            self.state
                .shards_of_order(order_id)
                .map_err(Rejection::internal)?
        } else {
            self.authorize_owner(remote_peer, &req).await?;
            self.state
                .list_shards()
                .map_err(Rejection::internal)?
                .into_iter()
                .filter(|s| s.owner == req.proposal.owner)
                .collect()
        };
        if !candidates
            .iter()
            .any(|s| s.cid == req.cid && serves(s, &req.proposal))
        {
            return Err(Rejection::new(
                ResponseCode::InvalidRequest,
                "no held shard matches the proposal",
            ));
        }

        let content = self
            .content
            .get(req.cid)
            .await
            .map_err(Rejection::internal)?
            .ok_or_else(|| Rejection::new(ResponseCode::InternalErr, "content not held"))?;
        debug!(cid = %req.cid, size = content.len(), remote = remote_peer, "serving content");
        Ok(ShardLoadResponse {
            code: ResponseCode::Success,
            message: String::new(),
            content: content.to_vec(),
        })
    }

    /// An auditor reading on its own behalf. Returns the order its relay
    /// proposal names.
    async fn authorize_fishmen(&self, req: &ShardLoadRequest) -> Result<u64, Rejection> {
        let owner = &req.proposal.owner;
        let fishmen = self.chain.get_fishmen().await.map_err(Rejection::internal)?;
        if !fishmen.iter().any(|f| f == owner) {
            return Err(Rejection::new(
                ResponseCode::InvalidFishmen,
                format!("{owner} is not a fishmen node"),
            ));
        }
        let (Some(relay), Some(signature)) = (&req.relay, &req.relay_signature) else {
            return Err(Rejection::new(
                ResponseCode::InvalidFishmen,
                "fishmen read without a relay proposal",
            ));
        };
        self.verify_account_signature(owner, relay, signature).await?;
        self.verify_account_signature(owner, &req.proposal, &req.signature)
            .await?;
        self.check_fresh(&req.proposal).await?;
        Ok(relay.order_id)
    }

    /// A content owner reading through its gateway, possibly via a relay.
    async fn authorize_owner(&self, remote_peer: &str, req: &ShardLoadRequest) -> Result<(), Rejection> {
        let proposal = &req.proposal;
        let doc = self
            .chain
            .get_sid_document(&req.signature.kid)
            .await
            .map_err(Rejection::internal)?
            .ok_or_else(|| Rejection::new(ResponseCode::InvalidSignature, "unknown signing key"))?;
        if doc.did != proposal.owner {
            return Err(Rejection::new(
                ResponseCode::InvalidSignature,
                "signing key does not belong to the owner",
            ));
        }
        let message = auth::canonical_bytes(proposal).map_err(Rejection::internal)?;
        if !doc
            .keys
            .iter()
            .any(|key| auth::verify(key, &message, &req.signature.signature))
        {
            return Err(Rejection::new(
                ResponseCode::InvalidSignature,
                "query proposal signature does not verify",
            ));
        }

        let gateway_peer = self
            .chain
            .get_node_peer(&proposal.gateway)
            .await
            .map_err(Rejection::internal)?;
        if gateway_peer.as_deref() != Some(remote_peer) {
            let (Some(relay), Some(signature)) = (&req.relay, &req.relay_signature) else {
                return Err(Rejection::new(
                    ResponseCode::InvalidRequest,
                    "request did not come from the proposal's gateway",
                ));
            };
            if relay.relay_peer != remote_peer {
                return Err(Rejection::new(
                    ResponseCode::InvalidRequest,
                    "relay proposal names another peer",
                ));
            }
            let relay_peer = self
                .chain
                .get_node_peer(&relay.node_address)
                .await
                .map_err(Rejection::internal)?;
            if relay_peer.as_deref() != Some(remote_peer) {
                return Err(Rejection::new(
                    ResponseCode::InvalidRequest,
                    "relay node is not registered with this peer",
                ));
            }
            self.verify_account_signature(&relay.node_address, relay, signature)
                .await?;
        }

        self.check_fresh(proposal).await
    }

    async fn check_fresh(&self, proposal: &QueryProposal) -> Result<(), Rejection> {
        let height = self
            .chain
            .get_last_height()
            .await
            .map_err(Rejection::internal)?;
        if proposal.last_valid_height < height {
            return Err(Rejection::new(
                ResponseCode::ProposalExpired,
                format!(
                    "proposal valid until {}, chain at {height}",
                    proposal.last_valid_height
                ),
            ));
        }
        Ok(())
    }

    /// Verify `signature` over `proposal` against the account key of
    /// `address`.
    async fn verify_account_signature<T: Serialize + Sync>(
        &self,
        address: &str,
        proposal: &T,
        signature: &JwsSignature,
    ) -> Result<(), Rejection> {
        let account = self
            .chain
            .get_account(address)
            .await
            .map_err(Rejection::internal)?
            .ok_or_else(|| {
                Rejection::new(ResponseCode::InvalidSignature, format!("no account for {address}"))
            })?;
        let message = auth::canonical_bytes(proposal).map_err(Rejection::internal)?;
        if !auth::verify(&account.public_key, &message, &signature.signature) {
            return Err(Rejection::new(
                ResponseCode::InvalidSignature,
                format!("proposal signature of {address} does not verify"),
            ));
        }
        Ok(())
    }
}

/// Whether `shard` holds content the signed `proposal` asks for.
fn serves(shard: &ShardInfo, proposal: &QueryProposal) -> bool {
    matches!(
        shard.state,
        ShardState::Stored | ShardState::TxSent | ShardState::Complete
    ) && (proposal.keyword == shard.data_id || proposal.keyword == shard.cid.to_string())
}
