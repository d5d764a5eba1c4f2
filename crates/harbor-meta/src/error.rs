/// Errors returned by [`StateStore`](crate::StateStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] postcard::Error),

    /// A stored key or value does not decode.
    #[error("corrupt {keyspace} entry")]
    Corrupt { keyspace: &'static str },
}
