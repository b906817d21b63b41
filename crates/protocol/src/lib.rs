//! rvbus Protocol - Wire-level types for the rvbus message bus
//!
//! This crate provides everything that touches the legacy RV wire format:
//! - `subject` - Subject grammar: segment counting, inbox/restricted
//!   classification, wildcard detection and compilation
//! - `wire` - The self-describing field codec (frame header, named fields,
//!   dot-encoded subjects)
//! - `envelope` - The message envelope: a borrowed view over one decoded
//!   frame (`mtype`, `sub`, `data`, `return`)
//! - `handshake` - The fixed-size version and info records exchanged
//!   before steady state
//!
//! # Design Principles
//!
//! - **Zero-copy**: Envelope payloads are offset+length views into the
//!   original receive buffer, never copied
//! - **Never desynchronize**: Every frame is bounded by its 4-byte length
//!   prefix; a malformed frame is skipped as a unit, the stream survives
//! - **Bounds checking everywhere**: Invalid input returns errors rather
//!   than panicking or reading out of bounds

mod envelope;
mod error;
mod handshake;
mod subject;
mod wire;

pub use envelope::{
    Envelope, EnvelopeBuf, Mtype, decode_envelope, encode_publish, encode_subscribe,
    encode_unsubscribe,
};
pub use error::ProtocolError;
pub use handshake::{
    CONNECTED_SUBJECT, INFO_FINAL, INFO_RECORD_LEN, INIT_SUBJECT, INITREFUSED_SUBJECT,
    INITRESP_SUBJECT, InfoRecord, VERSION_RECORD_LEN, VersionRecord,
};
pub use subject::{
    INBOX_PREFIX, MAX_SUBJECT_LEN, PatternMatcher, RESTRICTED_PREFIX, ServicePrefix,
    is_inbox_subject, is_restricted_subject, is_wildcard, segment_count, subject_hash,
};
pub use wire::{
    DataRef, Field, FieldReader, FieldType, FRAME_HEADER_LEN, FRAME_MAGIC, MAX_FRAME_LEN,
    MsgWriter,
};

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Interval between host-status heartbeats, in seconds
pub const STATUS_INTERVAL_SECS: u64 = 90;
