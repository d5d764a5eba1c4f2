//! Shard fulfillment engine for Harbor storage providers.
//!
//! The [`ShardEngine`] takes chain assignments, fetches and verifies shard
//! content from the order's gateway, stores it, completes the order on chain
//! and notifies the gateway. Every step is persisted so work resumes after a
//! restart. Alongside the scheduler it runs the migration loop (handing
//! shards to other providers) and the expiration sweep (dropping shards the
//! chain no longer lists).
//!
//! External collaborators are traits: [`ChainClient`] for the ledger,
//! [`ContentStore`](harbor_store::ContentStore) for bytes and
//! [`StorageProtocol`](harbor_net::StorageProtocol) for peers.

mod assign;
pub mod auth;
mod backoff;
pub mod chain;
mod engine;
mod error;
mod expire;
mod gateway;
mod load;
mod migrate;
mod process;
mod queue;
mod scheduler;

pub use backoff::Backoff;
pub use chain::{ChainClient, ChainError, MemoryChain, NewOrder};
pub use engine::{ShardEngine, ShardEngineConfig, rederive};
pub use error::EngineError;
pub use expire::SweepReport;
pub use gateway::StagingGateway;

#[cfg(test)]
mod tests;
