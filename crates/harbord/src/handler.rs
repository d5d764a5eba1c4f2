//! Incoming protocol handler for the Harbor daemon.
//!
//! Implements iroh's [`ProtocolHandler`] trait so the iroh [`Router`] hands
//! every connection on [`HARBOR_ALPN`](harbor_net::HARBOR_ALPN) to the
//! node's provider and gateway handlers.
//!
//! [`ProtocolHandler`]: iroh::protocol::ProtocolHandler
//! [`Router`]: iroh::protocol::Router

use std::fmt;

use harbor_net::{Handlers, handle_bi_streams};
use iroh::endpoint::Connection;
use iroh::protocol::AcceptError;
use tracing::debug;

pub struct HarborProtocol {
    handlers: Handlers,
}

impl fmt::Debug for HarborProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarborProtocol")
            .field("handlers", &self.handlers)
            .finish()
    }
}

impl HarborProtocol {
    pub fn new(handlers: Handlers) -> Self {
        Self { handlers }
    }
}

impl iroh::protocol::ProtocolHandler for HarborProtocol {
    async fn accept(&self, conn: Connection) -> Result<(), AcceptError> {
        let remote = conn.remote_id();
        debug!(remote = %remote.fmt_short(), "accepted connection");
        handle_bi_streams(conn, self.handlers.clone()).await;
        Ok(())
    }
}
