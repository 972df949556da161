use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Transport-layer errors (spec.md §7 "Transport errors" / "Resource errors").
#[derive(Error, Debug)]
pub enum Error {
    #[error("socket not connected")]
    NotConnected,

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("resolution in progress")]
    InProgress,

    #[error("operation aborted")]
    OperationAborted,

    #[error("connection refused by {0}")]
    ConnectionRefused(std::net::SocketAddr),

    #[error("no channel available for protocol {protocol} / family fit to {addr}")]
    NoChannelAvailable {
        protocol: sip_core::types::Protocol,
        addr: std::net::SocketAddr,
    },

    #[error("channel {0:?} not found")]
    ChannelNotFound(sip_core::types::ChannelId),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] sip_core::Error),

    #[cfg(feature = "tls")]
    #[error("tls error: {0}")]
    Tls(String),

    #[cfg(feature = "ws")]
    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("transport is shutting down")]
    ShuttingDown,
}
