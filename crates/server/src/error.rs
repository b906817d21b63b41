//! Server error types

use thiserror::Error;

use rvbus_protocol::ProtocolError;

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that can occur while running a session or the listener
#[derive(Debug, Error)]
pub enum ServerError {
    /// Wire-level decode failure that cannot be skipped
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Peer violated the handshake sequence
    #[error("handshake out of order: {0}")]
    Handshake(&'static str),

    /// Frame length prefix outside the accepted range
    ///
    /// Unlike a malformed frame body this cannot be skipped: the stream
    /// position would be lost, so the session ends.
    #[error("frame length {0} out of range")]
    BadFrameLength(u32),

    /// Socket-level failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// True when the error ends the session
    ///
    /// Frame-scoped protocol errors are absorbed inside the state machine;
    /// anything that escapes to the caller is fatal to the connection but
    /// never to the daemon.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            Self::Protocol(e) => !e.is_frame_error(),
            Self::Handshake(_) | Self::BadFrameLength(_) | Self::Io(_) => true,
        }
    }
}
