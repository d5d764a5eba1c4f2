//! Harbor's storage protocol.
//!
//! - [`message`]: request/response types and the [`HarborMessage`] envelope.
//! - [`codec`]: `[codec][len][payload]` framing with JSON and postcard payloads.
//! - [`StorageProtocol`]: the outbound seam, with [`LocalProtocol`] for
//!   same-process hand-off and [`StreamProtocol`] for iroh peers.
//! - [`ShardProvider`] / [`ShardGateway`]: inbound handler traits, routed by
//!   [`Handlers::dispatch`].

pub mod codec;
mod dispatch;
mod error;
mod local;
pub mod message;
mod protocol;
mod stream;

pub use codec::WireCodec;
pub use dispatch::Handlers;
pub use error::NetError;
pub use local::{LOCAL_PEER, LocalInbox, LocalProtocol, serve_local};
pub use message::*;
pub use protocol::{ShardGateway, ShardProvider, StorageProtocol};
pub use stream::{HARBOR_ALPN, StreamProtocol, handle_bi_streams, parse_peer, recv_frame, send_frame};
