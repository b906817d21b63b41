//! Fixed-size handshake records
//!
//! Before any envelope flows, both ends exchange two fixed-size raw records:
//! a 12-byte version record (three big-endian words) and one or more 64-byte
//! info records (sixteen big-endian words). An info record whose first word
//! is [`INFO_FINAL`] closes negotiation; any other value is a fresh record
//! that must be answered.
//!
//! These records predate the field codec and carry no length prefix; the
//! receiving state machine knows their size from its current state.

use bytes::{BufMut, BytesMut};

use crate::{ProtocolError, Result};

/// Byte length of the version record
pub const VERSION_RECORD_LEN: usize = 12;

/// Byte length of the info record
pub const INFO_RECORD_LEN: usize = 64;

/// First-word value marking an info record as final
pub const INFO_FINAL: u32 = 1;

/// Subject of the client's init envelope
pub const INIT_SUBJECT: &str = "RVD.INIT";

/// Subject of the daemon's init response
pub const INITRESP_SUBJECT: &str = "RVD.INITRESP";

/// Subject of the daemon's init refusal
pub const INITREFUSED_SUBJECT: &str = "RVD.INITREFUSED";

/// Advisory confirming session establishment, sent to the session itself
pub const CONNECTED_SUBJECT: &str = "_RV.INFO.SYSTEM.RVD.CONNECTED";

/// The 12-byte version record: three big-endian words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRecord {
    pub words: [u32; 3],
}

impl VersionRecord {
    /// The record both ends send: protocol generation 4
    pub const LOCAL: Self = Self { words: [0, 4, 0] };

    /// Decode from exactly 12 bytes
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != VERSION_RECORD_LEN {
            return Err(ProtocolError::BadFormat("version record is not 12 bytes"));
        }
        let mut words = [0u32; 3];
        for (i, w) in words.iter_mut().enumerate() {
            *w = u32::from_be_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
        }
        Ok(Self { words })
    }

    /// Append the 12-byte encoding
    pub fn encode(&self, out: &mut BytesMut) {
        for w in self.words {
            out.put_u32(w);
        }
    }
}

/// The 64-byte info record: sixteen big-endian words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoRecord {
    pub words: [u32; 16],
}

impl InfoRecord {
    /// A fresh negotiation record (first word not [`INFO_FINAL`])
    pub fn fresh() -> Self {
        let mut words = [0u32; 16];
        words[0] = 3;
        words[1] = 2;
        words[3] = 1;
        words[5] = 4 << 24;
        words[6] = 4 << 24;
        Self { words }
    }

    /// The final record closing negotiation
    pub fn final_record() -> Self {
        let mut rec = Self::fresh();
        rec.words[0] = INFO_FINAL;
        rec
    }

    /// True when this record closes negotiation
    #[inline]
    pub fn is_final(&self) -> bool {
        self.words[0] == INFO_FINAL
    }

    /// Decode from exactly 64 bytes
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != INFO_RECORD_LEN {
            return Err(ProtocolError::BadFormat("info record is not 64 bytes"));
        }
        let mut words = [0u32; 16];
        for (i, w) in words.iter_mut().enumerate() {
            *w = u32::from_be_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
        }
        Ok(Self { words })
    }

    /// Append the 64-byte encoding
    pub fn encode(&self, out: &mut BytesMut) {
        for w in self.words {
            out.put_u32(w);
        }
    }
}
