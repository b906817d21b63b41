//! Message envelope
//!
//! Every steady-state frame is an envelope: a field-coded message with a
//! one-character `mtype`, a dot-encoded `sub` subject, an optional typed
//! `data` payload and an optional `return` reply subject.
//!
//! Decoding produces a borrowed [`Envelope`] view: the payload stays inside
//! the receive buffer, the subject strings are decoded into a caller-owned
//! [`EnvelopeBuf`] that is reused frame after frame. Nothing is copied per
//! message beyond the subject text itself.

use bytes::Bytes;

use crate::subject::{is_wildcard, MAX_SUBJECT_LEN};
use crate::wire::{decode_subject, DataRef, FieldReader, FieldType, MsgWriter};
use crate::{ProtocolError, Result};

/// Message-type character carried in the `mtype` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mtype {
    /// Application data publish
    Data = b'D',
    /// Advisory (session/listen/status events)
    Advisory = b'A',
    /// Subscribe request
    Listen = b'L',
    /// Unsubscribe request
    Cancel = b'C',
    /// Session initialization
    Init = b'I',
}

impl Mtype {
    /// Classify a one-byte mtype character
    pub fn from_u8(c: u8) -> Result<Self> {
        match c {
            b'D' => Ok(Self::Data),
            b'A' => Ok(Self::Advisory),
            b'L' => Ok(Self::Listen),
            b'C' => Ok(Self::Cancel),
            b'I' => Ok(Self::Init),
            other => Err(ProtocolError::BadMtype(other)),
        }
    }

    /// The wire character
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "D",
            Self::Advisory => "A",
            Self::Listen => "L",
            Self::Cancel => "C",
            Self::Init => "I",
        }
    }

    /// True for message types that carry a payload
    #[inline]
    pub fn carries_data(&self) -> bool {
        matches!(self, Self::Data | Self::Advisory)
    }
}

/// Reusable scratch space for decoded subject text
///
/// One buffer lives per connection; `decode_envelope` clears and refills it,
/// so steady-state decoding allocates only when a subject outgrows the
/// buffer's prior capacity.
#[derive(Debug, Default)]
pub struct EnvelopeBuf {
    sub: String,
    reply: String,
}

impl EnvelopeBuf {
    /// Fresh empty scratch buffer
    pub fn new() -> Self {
        Self {
            sub: String::with_capacity(64),
            reply: String::with_capacity(64),
        }
    }
}

/// A decoded envelope: borrowed views over the frame and scratch buffer
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    /// Message type
    pub mtype: Mtype,
    /// Decoded subject in dotted form
    pub sub: &'a str,
    /// Reply subject from the `return` field, if present
    pub reply: Option<&'a str>,
    /// Typed payload view, if present
    pub data: Option<DataRef<'a>>,
}

/// Decode one complete frame into an envelope
///
/// Returns `Ok(None)` for an 8-byte keepalive frame. The frame must already
/// be exactly one length-delimited message.
///
/// # Errors
///
/// - `BadMtype` when the `mtype` field is not one character of `DALCI`
/// - `BadSubject` when the `sub` field is missing or malformed
/// - `BadData` when a `D` or `A` envelope carries no `data` field
/// - `BadFormat` / `BadReference` on any field-level truncation
pub fn decode_envelope<'a>(
    frame: &'a [u8],
    buf: &'a mut EnvelopeBuf,
) -> Result<Option<Envelope<'a>>> {
    if FieldReader::is_empty_frame(frame) {
        return Ok(None);
    }
    let mut rdr = FieldReader::new(frame)?;

    let mut mtype: Option<Mtype> = None;
    let mut sub_raw: Option<&[u8]> = None;
    let mut reply_raw: Option<&[u8]> = None;
    let mut data: Option<DataRef<'a>> = None;

    while let Some(field) = rdr.next_field()? {
        match field.name {
            "mtype" => {
                if field.ftype != FieldType::String || field.data.len() != 1 {
                    let c = field.data.first().copied().unwrap_or(0);
                    return Err(ProtocolError::BadMtype(c));
                }
                mtype = Some(Mtype::from_u8(field.data[0])?);
            }
            "sub" => {
                if field.ftype != FieldType::Subject {
                    return Err(ProtocolError::BadSubject("sub field is not a subject"));
                }
                sub_raw = Some(field.data);
            }
            "return" => {
                if field.ftype != FieldType::Subject {
                    return Err(ProtocolError::BadSubject("return field is not a subject"));
                }
                reply_raw = Some(field.data);
            }
            "data" => {
                data = Some(DataRef {
                    ftype: field.ftype,
                    bytes: field.data,
                });
            }
            // Unknown fields are skipped, not rejected
            _ => {}
        }
    }

    let mtype = mtype.ok_or(ProtocolError::BadMtype(0))?;
    let sub_raw = sub_raw.ok_or(ProtocolError::BadSubject("missing sub field"))?;
    if mtype.carries_data() && data.is_none() {
        return Err(ProtocolError::BadData);
    }

    buf.sub.clear();
    decode_subject(sub_raw, &mut buf.sub)?;
    buf.reply.clear();
    let reply = match reply_raw {
        Some(raw) => {
            decode_subject(raw, &mut buf.reply)?;
            Some(buf.reply.as_str())
        }
        None => None,
    };

    Ok(Some(Envelope {
        mtype,
        sub: buf.sub.as_str(),
        reply,
        data,
    }))
}

fn check_concrete(subject: &str) -> Result<()> {
    if subject.is_empty() || subject.len() > MAX_SUBJECT_LEN {
        return Err(ProtocolError::BadSubject("subject length out of range"));
    }
    if is_wildcard(subject) {
        return Err(ProtocolError::BadSubject("wildcard in concrete subject"));
    }
    Ok(())
}

/// Encode a publish or advisory envelope
pub fn encode_publish(
    mtype: Mtype,
    subject: &str,
    reply: Option<&str>,
    ftype: FieldType,
    data: &[u8],
) -> Result<Bytes> {
    debug_assert!(mtype.carries_data());
    check_concrete(subject)?;
    let mut w = MsgWriter::with_capacity(64 + subject.len() + data.len());
    w.append_string("mtype", mtype.as_str());
    w.append_subject("sub", subject)?;
    if let Some(reply) = reply {
        check_concrete(reply)?;
        w.append_subject("return", reply)?;
    }
    w.append_opaque("data", ftype, data);
    Ok(w.finish())
}

/// Encode a subscribe (`L`) envelope; the subject may carry wildcards
pub fn encode_subscribe(subject: &str) -> Result<Bytes> {
    if subject.is_empty() || subject.len() > MAX_SUBJECT_LEN {
        return Err(ProtocolError::BadSubject("subject length out of range"));
    }
    let mut w = MsgWriter::with_capacity(32 + subject.len());
    w.append_string("mtype", Mtype::Listen.as_str());
    w.append_subject("sub", subject)?;
    Ok(w.finish())
}

/// Encode an unsubscribe (`C`) envelope for a previously subscribed subject
pub fn encode_unsubscribe(subject: &str) -> Result<Bytes> {
    if subject.is_empty() || subject.len() > MAX_SUBJECT_LEN {
        return Err(ProtocolError::BadSubject("subject length out of range"));
    }
    let mut w = MsgWriter::with_capacity(32 + subject.len());
    w.append_string("mtype", Mtype::Cancel.as_str());
    w.append_subject("sub", subject)?;
    Ok(w.finish())
}
