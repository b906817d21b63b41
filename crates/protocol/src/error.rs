//! Protocol error taxonomy
//!
//! Frame-level decode errors never abort the connection by themselves; the
//! connection owner decides what to do with a bad frame (see the service and
//! client state machines). Handshake sequencing errors are fatal and are
//! raised by the state machines, not here.

use thiserror::Error;

/// Errors that can occur while decoding or routing protocol messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not a valid envelope (bad header, truncated field, ...)
    #[error("bad msg format: {0}")]
    BadFormat(&'static str),

    /// Payload reference points outside the frame bounds
    #[error("bad data reference: offset {offset} + len {len} exceeds frame of {frame_len} bytes")]
    BadReference {
        offset: usize,
        len: usize,
        frame_len: usize,
    },

    /// Unrecognized message-type character
    #[error("bad msg mtype: {0:#04x}")]
    BadMtype(u8),

    /// Subject fails the grammar or its wire encoding is malformed
    #[error("bad msg subject: {0}")]
    BadSubject(&'static str),

    /// Publish-type frame carries no data field
    #[error("bad msg data")]
    BadData,

    /// Malformed wildcard pattern
    #[error("bad wildcard pattern `{pattern}`: {reason}")]
    BadPattern {
        pattern: String,
        reason: &'static str,
    },

    /// The routing fabric cannot accept more traffic right now
    #[error("forward backpressure")]
    Backpressure,

    /// Client-side handshake rejected by the daemon
    #[error("start host failed: error {0}")]
    StartHostFailed(i32),
}

impl ProtocolError {
    /// Create a bad-pattern error
    #[inline]
    pub fn bad_pattern(pattern: impl Into<String>, reason: &'static str) -> Self {
        Self::BadPattern {
            pattern: pattern.into(),
            reason,
        }
    }

    /// True for errors scoped to a single frame
    ///
    /// A frame error is logged and the frame skipped; the stream position is
    /// still known from the length prefix, so the connection survives.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            Self::BadFormat(_)
                | Self::BadReference { .. }
                | Self::BadMtype(_)
                | Self::BadSubject(_)
                | Self::BadData
                | Self::BadPattern { .. }
        )
    }
}
