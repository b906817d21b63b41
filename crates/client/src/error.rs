//! Client error types

use thiserror::Error;

use rvbus_protocol::ProtocolError;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur on a client session
#[derive(Debug, Error)]
pub enum ClientError {
    /// Wire-level decode failure
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Daemon violated the handshake sequence
    #[error("handshake out of order: {0}")]
    Handshake(&'static str),

    /// Unparseable daemon address string
    #[error("bad daemon address '{0}'")]
    BadDaemon(String),

    /// Socket-level failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The daemon closed the connection
    #[error("connection closed by daemon")]
    Closed,
}

impl ClientError {
    /// True when reconnecting may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(_) | Self::Closed => true,
            Self::Protocol(e) => e.is_frame_error(),
            Self::Handshake(_) | Self::BadDaemon(_) => false,
        }
    }
}
