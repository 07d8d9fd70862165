use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("peer rejected the request: {0}")]
    ProtocolError(String),

    #[error("no response within the operation's timeout")]
    MissingResponse,

    #[error("send attempted before message-layer initialization completed")]
    NotInitialized,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Transport(#[from] lcc_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
