use thiserror::Error;

/// Errors produced by the forwarder protocol layer and surfaced across the
/// agent API.
#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("unknown protocol tag: {0}")]
    UnknownProtocol(u8),

    #[error("port {port} already open for {proto:?}")]
    PortAlreadyOpen { proto: crate::protocol::ProtoTag, port: u16 },

    #[error("maximum number of connections reached")]
    MaxConnections,

    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    #[error("overlay transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type ForwarderResult<T> = Result<T, ForwarderError>;
