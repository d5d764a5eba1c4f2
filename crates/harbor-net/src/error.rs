//! Error types for protocol transports.

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("connect error: {0}")]
    Connect(String),

    #[error("connection error: {0}")]
    Connection(#[from] iroh::endpoint::ConnectionError),

    #[error("stream open error: {0}")]
    StreamOpen(String),

    #[error("write error: {0}")]
    Write(#[from] iroh::endpoint::WriteError),

    #[error("stream closed: {0}")]
    ClosedStream(#[from] iroh::endpoint::ClosedStream),

    #[error("read error: {0}")]
    ReadToEnd(#[from] iroh::endpoint::ReadToEndError),

    #[error("read exact error: {0}")]
    ReadExact(#[from] iroh::endpoint::ReadExactError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("endpoint error: {0}")]
    Endpoint(String),

    /// Peer string is not `<endpoint-id>[@<ip:port>]`.
    #[error("invalid peer {peer:?}: {reason}")]
    InvalidPeer { peer: String, reason: String },

    /// The peer answered with a message of the wrong kind.
    #[error("unexpected response: expected {expected}, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },

    #[error("peer rejected request: {0}")]
    Rejected(String),

    /// The in-process inbox is gone.
    #[error("local protocol closed")]
    LocalClosed,
}
