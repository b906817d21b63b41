//! Self-describing field codec
//!
//! Every steady-state frame is a sequence of named, typed fields behind an
//! 8-byte header:
//!
//! ```text
//! [4 bytes: frame length, big-endian, header included]
//! [4 bytes: magic]
//! [fields...]
//! ```
//!
//! Each field:
//!
//! ```text
//! [1 byte: name length][name bytes]
//! [1 byte: type tag]
//! [4 bytes: data length, big-endian][data bytes]
//! ```
//!
//! Subjects travel dot-encoded: a segment count followed by length-prefixed
//! segments, so an embedded `.` in a segment can never corrupt routing.
//! An 8-byte header-only frame is an empty keepalive.
//!
//! All reads are bounds-checked; a field whose declared length runs past the
//! frame is a `BadReference`, never a panic.

use bytes::{BufMut, Bytes, BytesMut};

use crate::subject::MAX_SUBJECT_LEN;
use crate::{ProtocolError, Result};

/// Frame header: 4-byte length plus 4-byte magic
pub const FRAME_HEADER_LEN: usize = 8;

/// Frame magic word
pub const FRAME_MAGIC: u32 = 0x9955_eeaa;

/// Maximum accepted frame length (1MB)
pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

/// Wire type tag of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    /// UTF-8 string, no terminator
    String = 1,
    /// Opaque bytes, forwarded untouched
    Opaque = 2,
    /// Dot-encoded subject
    Subject = 3,
    /// Big-endian i32
    Int = 4,
    /// Network address data (4-byte IPv4 or 2-byte port)
    IpData = 5,
    /// Nested field-encoded message
    Message = 6,
}

impl FieldType {
    fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(Self::String),
            2 => Ok(Self::Opaque),
            3 => Ok(Self::Subject),
            4 => Ok(Self::Int),
            5 => Ok(Self::IpData),
            6 => Ok(Self::Message),
            _ => Err(ProtocolError::BadFormat("unknown field type tag")),
        }
    }
}

/// A typed payload reference: a view into the frame, never a copy
#[derive(Debug, Clone, Copy)]
pub struct DataRef<'a> {
    /// Wire type of the payload
    pub ftype: FieldType,
    /// Payload bytes within the original frame
    pub bytes: &'a [u8],
}

/// One decoded field
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    /// Field name
    pub name: &'a str,
    /// Wire type tag
    pub ftype: FieldType,
    /// Raw field data
    pub data: &'a [u8],
}

impl<'a> Field<'a> {
    /// Interpret the data as a UTF-8 string
    pub fn as_str(&self) -> Result<&'a str> {
        std::str::from_utf8(self.data).map_err(|_| ProtocolError::BadFormat("invalid utf-8 string"))
    }

    /// Interpret the data as a big-endian i32
    pub fn as_i32(&self) -> Result<i32> {
        let arr: [u8; 4] = self
            .data
            .try_into()
            .map_err(|_| ProtocolError::BadFormat("int field is not 4 bytes"))?;
        Ok(i32::from_be_bytes(arr))
    }
}

/// Append a dot-encoded subject to `out`
///
/// Encoding: `[u16 be: segment count][per segment: u8 length, bytes]`.
pub fn encode_subject(subject: &str, out: &mut BytesMut) -> Result<()> {
    if subject.is_empty() || subject.len() > MAX_SUBJECT_LEN {
        return Err(ProtocolError::BadSubject("subject length out of range"));
    }
    let nsegs = crate::subject::segment_count(subject);
    out.put_u16(nsegs);
    for seg in subject.split('.') {
        if seg.is_empty() {
            return Err(ProtocolError::BadSubject("empty segment"));
        }
        if seg.len() > u8::MAX as usize {
            return Err(ProtocolError::BadSubject("segment too long"));
        }
        out.put_u8(seg.len() as u8);
        out.put_slice(seg.as_bytes());
    }
    Ok(())
}

/// Decode a dot-encoded subject, appending the dotted form to `out`
pub fn decode_subject(data: &[u8], out: &mut String) -> Result<()> {
    if data.len() < 2 {
        return Err(ProtocolError::BadSubject("truncated subject encoding"));
    }
    let nsegs = u16::from_be_bytes([data[0], data[1]]);
    if nsegs == 0 {
        return Err(ProtocolError::BadSubject("zero segments"));
    }
    let mut off = 2usize;
    for i in 0..nsegs {
        let len = *data
            .get(off)
            .ok_or(ProtocolError::BadSubject("truncated subject encoding"))?
            as usize;
        off += 1;
        if len == 0 {
            return Err(ProtocolError::BadSubject("empty segment"));
        }
        let seg = data
            .get(off..off + len)
            .ok_or(ProtocolError::BadSubject("truncated subject encoding"))?;
        let seg =
            std::str::from_utf8(seg).map_err(|_| ProtocolError::BadSubject("invalid utf-8"))?;
        if i > 0 {
            out.push('.');
        }
        out.push_str(seg);
        off += len;
    }
    if off != data.len() {
        return Err(ProtocolError::BadSubject("trailing bytes after subject"));
    }
    if out.len() > MAX_SUBJECT_LEN {
        return Err(ProtocolError::BadSubject("subject length out of range"));
    }
    Ok(())
}

/// Builder for one outbound frame
///
/// # Example
///
/// ```
/// use rvbus_protocol::MsgWriter;
///
/// let mut w = MsgWriter::new();
/// w.append_string("mtype", "D");
/// w.append_subject("sub", "FOO.BAR").unwrap();
/// let frame = w.finish();
/// assert_eq!(&frame[..4], &(frame.len() as u32).to_be_bytes());
/// ```
#[derive(Debug)]
pub struct MsgWriter {
    buf: BytesMut,
}

impl Default for MsgWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MsgWriter {
    /// Start a frame, reserving the header
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Start a frame with a capacity hint
    pub fn with_capacity(cap: usize) -> Self {
        let mut buf = BytesMut::with_capacity(cap.max(FRAME_HEADER_LEN));
        buf.put_bytes(0, FRAME_HEADER_LEN);
        Self { buf }
    }

    fn field_hdr(&mut self, name: &str, ftype: FieldType, data_len: usize) {
        debug_assert!(!name.is_empty() && name.len() <= u8::MAX as usize);
        self.buf.put_u8(name.len() as u8);
        self.buf.put_slice(name.as_bytes());
        self.buf.put_u8(ftype as u8);
        self.buf.put_u32(data_len as u32);
    }

    /// Append a string field
    pub fn append_string(&mut self, name: &str, val: &str) -> &mut Self {
        self.field_hdr(name, FieldType::String, val.len());
        self.buf.put_slice(val.as_bytes());
        self
    }

    /// Append a dot-encoded subject field
    pub fn append_subject(&mut self, name: &str, subject: &str) -> Result<&mut Self> {
        let mut enc = BytesMut::with_capacity(subject.len() + 8);
        encode_subject(subject, &mut enc)?;
        self.field_hdr(name, FieldType::Subject, enc.len());
        self.buf.put_slice(&enc);
        Ok(self)
    }

    /// Append an opaque or typed payload field
    pub fn append_opaque(&mut self, name: &str, ftype: FieldType, data: &[u8]) -> &mut Self {
        self.field_hdr(name, ftype, data.len());
        self.buf.put_slice(data);
        self
    }

    /// Append a big-endian i32 field
    pub fn append_int(&mut self, name: &str, val: i32) -> &mut Self {
        self.field_hdr(name, FieldType::Int, 4);
        self.buf.put_i32(val);
        self
    }

    /// Append raw network-address data
    pub fn append_ipdata(&mut self, name: &str, data: &[u8]) -> &mut Self {
        self.field_hdr(name, FieldType::IpData, data.len());
        self.buf.put_slice(data);
        self
    }

    /// Append a nested message field from a finished inner frame
    pub fn append_message(&mut self, name: &str, inner: &[u8]) -> &mut Self {
        self.field_hdr(name, FieldType::Message, inner.len());
        self.buf.put_slice(inner);
        self
    }

    /// Current frame size, header included
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when no fields have been appended
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.len() == FRAME_HEADER_LEN
    }

    /// Fill in the header and freeze the frame
    pub fn finish(mut self) -> Bytes {
        let len = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&len.to_be_bytes());
        self.buf[4..8].copy_from_slice(&FRAME_MAGIC.to_be_bytes());
        self.buf.freeze()
    }
}

/// Sequential reader over the fields of one complete frame
///
/// The caller has already resolved the frame boundary from the length
/// prefix; `new` re-validates the header against the slice it was handed.
#[derive(Debug, Clone, Copy)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> FieldReader<'a> {
    /// Validate the frame header and position at the first field
    pub fn new(frame: &'a [u8]) -> Result<Self> {
        if frame.len() < FRAME_HEADER_LEN {
            return Err(ProtocolError::BadFormat("frame shorter than header"));
        }
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        if len != frame.len() {
            return Err(ProtocolError::BadFormat("frame length mismatch"));
        }
        let magic = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);
        if magic != FRAME_MAGIC {
            return Err(ProtocolError::BadFormat("bad frame magic"));
        }
        Ok(Self {
            buf: frame,
            off: FRAME_HEADER_LEN,
        })
    }

    /// True for an 8-byte header-only keepalive frame
    #[inline]
    pub fn is_empty_frame(frame: &[u8]) -> bool {
        frame.len() == FRAME_HEADER_LEN
    }

    /// Decode the next field, or `None` at end of frame
    pub fn next_field(&mut self) -> Result<Option<Field<'a>>> {
        if self.off == self.buf.len() {
            return Ok(None);
        }
        let frame_len = self.buf.len();

        let name_len = *self
            .buf
            .get(self.off)
            .ok_or(ProtocolError::BadFormat("truncated field name length"))?
            as usize;
        if name_len == 0 {
            return Err(ProtocolError::BadFormat("zero-length field name"));
        }
        let name_start = self.off + 1;
        let name = self
            .buf
            .get(name_start..name_start + name_len)
            .ok_or(ProtocolError::BadFormat("truncated field name"))?;
        let name = std::str::from_utf8(name)
            .map_err(|_| ProtocolError::BadFormat("field name not utf-8"))?;

        let tag_off = name_start + name_len;
        let tag = *self
            .buf
            .get(tag_off)
            .ok_or(ProtocolError::BadFormat("truncated field type"))?;
        let ftype = FieldType::from_u8(tag)?;

        let len_off = tag_off + 1;
        let len_bytes = self
            .buf
            .get(len_off..len_off + 4)
            .ok_or(ProtocolError::BadFormat("truncated field length"))?;
        let data_len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;

        let data_off = len_off + 4;
        let data = self.buf.get(data_off..data_off + data_len).ok_or(
            ProtocolError::BadReference {
                offset: data_off,
                len: data_len,
                frame_len,
            },
        )?;

        self.off = data_off + data_len;
        Ok(Some(Field {
            name,
            ftype,
            data,
        }))
    }

    /// Scan from the start of the frame for a field by name
    pub fn find(&self, name: &str) -> Result<Option<Field<'a>>> {
        let mut rdr = Self {
            buf: self.buf,
            off: FRAME_HEADER_LEN,
        };
        while let Some(field) = rdr.next_field()? {
            if field.name == name {
                return Ok(Some(field));
            }
        }
        Ok(None)
    }
}
