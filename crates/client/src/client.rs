//! Client-side session state machine
//!
//! Mirror image of the daemon's session machine, sans-I/O in the same way:
//! socket bytes go in through [`RvClient::on_bytes`], decoded events come
//! back out, and bytes for the daemon accumulate in an output buffer.
//!
//! # Handshake
//!
//! The client speaks first: its version record is queued at construction.
//!
//! ```text
//! state        daemon sends              client replies
//! VersionRecv  12-byte version record    64-byte info record
//! InfoRecv     64-byte final info        'I' init envelope
//! InitRecv     RVD.INITRESP envelope     'I' init (session filled in)
//! ConnRecv     RVD.CONNECTED advisory    'L' for the session inbox
//! DataRecv     D/A envelopes             D/L/C envelopes
//! ```
//!
//! Publishes and subscriptions issued before `DataRecv` are held in a side
//! buffer and flushed the moment the session is confirmed.
//!
//! # Null sessions
//!
//! A null session never talks to a daemon: the session identity is
//! synthesized locally and the machine starts in `DataRecv` with writes
//! disabled. Useful for tooling that wants inbox names and local match
//! bookkeeping without a bus.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, trace, warn};

use rvbus_protocol::{
    decode_envelope, encode_publish, encode_subscribe, encode_unsubscribe, is_wildcard,
    EnvelopeBuf, FieldReader, FieldType, InfoRecord, Mtype, MsgWriter, ProtocolError,
    VersionRecord, CONNECTED_SUBJECT, FRAME_HEADER_LEN, INFO_RECORD_LEN, INIT_SUBJECT,
    INITREFUSED_SUBJECT, INITRESP_SUBJECT, MAX_FRAME_LEN, VERSION_RECORD_LEN,
};
use rvbus_routing::{PatternMap, PatternPut, PatternRemove, SubMap, SubPut, SubRemove};

use crate::error::{ClientError, Result};

/// Handshake progress of the client session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Waiting for the daemon's version record
    VersionRecv,
    /// Waiting for the daemon's final info record
    InfoRecv,
    /// Init sent, waiting for RVD.INITRESP
    InitRecv,
    /// Session reported, waiting for RVD.CONNECTED
    ConnRecv,
    /// Steady state
    DataRecv,
}

/// Something the daemon told us
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The session is established
    Connected {
        /// Synthesized session identifier
        session: String,
    },
    /// A data or advisory delivery
    Message {
        /// Message type (`Data` or `Advisory`)
        mtype: Mtype,
        /// Concrete subject
        subject: String,
        /// Reply subject, if the publisher wants answers
        reply: Option<String>,
        /// Payload wire type
        ftype: FieldType,
        /// Payload bytes
        payload: Bytes,
    },
}

/// Identity parameters sent during session setup
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// User identifier reported to the daemon
    pub userid: String,
    /// Service name, if any
    pub service: Option<String>,
    /// Network specification, if any
    pub network: Option<String>,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            userid: "nobody".to_string(),
            service: None,
            network: None,
        }
    }
}

impl From<&rvbus_config::ClientConfig> for SessionParams {
    fn from(config: &rvbus_config::ClientConfig) -> Self {
        Self {
            userid: config.userid.clone(),
            service: config.service.clone(),
            network: config.network.clone(),
        }
    }
}

const NULL_IPADDR: u32 = 0x7f00_0001;
const NULL_IPPORT: u16 = 0x1234;

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Client-side session state machine
pub struct RvClient {
    params: SessionParams,
    state: ClientState,

    sub_tab: SubMap,
    pat_tab: PatternMap,

    env_buf: EnvelopeBuf,
    recv: BytesMut,
    out: BytesMut,
    save_buf: BytesMut,

    session: String,
    control: String,
    ipaddr: u32,
    ipport: u16,
    gob: u32,
    next_inbox: u64,

    no_write: bool,
    frame_errors: u64,
}

impl RvClient {
    /// Start a daemon-bound session; the version record is queued at once
    pub fn new(params: SessionParams) -> Self {
        let mut out = BytesMut::with_capacity(256);
        VersionRecord::LOCAL.encode(&mut out);
        Self {
            params,
            state: ClientState::VersionRecv,
            sub_tab: SubMap::new(),
            pat_tab: PatternMap::new(),
            env_buf: EnvelopeBuf::new(),
            recv: BytesMut::with_capacity(4096),
            out,
            save_buf: BytesMut::new(),
            session: String::new(),
            control: String::new(),
            ipaddr: 0,
            ipport: 0,
            gob: 0,
            // Inbox 1 is the control inbox
            next_inbox: 2,
            no_write: false,
            frame_errors: 0,
        }
    }

    /// Start a null session: local identity, no daemon, writes disabled
    pub fn null(params: SessionParams) -> Self {
        let mut client = Self::new(params);
        client.out.clear();
        client.ipaddr = NULL_IPADDR;
        client.ipport = NULL_IPPORT;
        client.gob = 1;
        client.session = synthesize_session(NULL_IPADDR, 1);
        client.control = format!("_INBOX.{}.1", client.session);
        client.no_write = true;
        client.state = ClientState::DataRecv;
        client
    }

    /// Current handshake state
    #[inline]
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// True once envelopes may flow
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state == ClientState::DataRecv
    }

    /// Session identifier, empty until connected
    #[inline]
    pub fn session(&self) -> &str {
        &self.session
    }

    /// The session's control inbox subject
    #[inline]
    pub fn control(&self) -> &str {
        &self.control
    }

    /// Peer address and port the daemon reported for this session
    #[inline]
    pub fn endpoint(&self) -> (u32, u16) {
        (self.ipaddr, self.ipport)
    }

    /// Frames skipped for decode errors
    #[inline]
    pub fn frame_errors(&self) -> u64 {
        self.frame_errors
    }

    /// Distinct exact subscriptions
    #[inline]
    pub fn sub_count(&self) -> usize {
        self.sub_tab.sub_count()
    }

    /// Distinct wildcard subscriptions
    #[inline]
    pub fn pattern_count(&self) -> usize {
        self.pat_tab.pattern_count()
    }

    /// True when output bytes are pending for the daemon
    #[inline]
    pub fn has_output(&self) -> bool {
        !self.out.is_empty()
    }

    /// Drain everything queued for the daemon
    pub fn take_output(&mut self) -> Bytes {
        self.out.split().freeze()
    }

    /// Mint a fresh inbox subject under this session
    pub fn make_inbox(&mut self) -> String {
        let n = self.next_inbox;
        self.next_inbox += 1;
        format!("_INBOX.{}.{n}", self.session)
    }

    /// Feed daemon bytes and collect decoded events
    pub fn on_bytes(&mut self, bytes: &[u8]) -> Result<Vec<ClientEvent>> {
        self.recv.extend_from_slice(bytes);
        let mut events = Vec::new();
        loop {
            let progressed = match self.state {
                ClientState::VersionRecv => self.process_version()?,
                ClientState::InfoRecv => self.process_info()?,
                ClientState::InitRecv | ClientState::ConnRecv | ClientState::DataRecv => {
                    self.process_frame(&mut events)?
                }
            };
            if !progressed {
                return Ok(events);
            }
        }
    }

    fn process_version(&mut self) -> Result<bool> {
        if self.recv.len() < VERSION_RECORD_LEN {
            return Ok(false);
        }
        let raw = self.recv.split_to(VERSION_RECORD_LEN);
        let vers = VersionRecord::decode(&raw)?;
        trace!(words = ?vers.words, "daemon version received");
        InfoRecord::fresh().encode(&mut self.out);
        self.state = ClientState::InfoRecv;
        Ok(true)
    }

    fn process_info(&mut self) -> Result<bool> {
        if self.recv.len() < INFO_RECORD_LEN {
            return Ok(false);
        }
        let raw = self.recv.split_to(INFO_RECORD_LEN);
        let info = InfoRecord::decode(&raw)?;
        if !info.is_final() {
            return Err(ClientError::Handshake("expected final info record"));
        }
        self.send_init(None)?;
        self.state = ClientState::InitRecv;
        Ok(true)
    }

    fn send_init(&mut self, session: Option<&str>) -> Result<()> {
        let mut w = MsgWriter::new();
        w.append_string("mtype", Mtype::Init.as_str());
        w.append_subject("sub", INIT_SUBJECT)?;
        w.append_string("userid", &self.params.userid);
        if let Some(service) = &self.params.service {
            w.append_string("service", service);
        }
        if let Some(network) = &self.params.network {
            w.append_string("network", network);
        }
        if let Some(session) = session {
            w.append_string("session", session);
            w.append_subject("control", &self.control)?;
        }
        w.append_int("vmaj", 5);
        w.append_int("vmin", 4);
        w.append_int("vupd", 2);
        self.out.extend_from_slice(&w.finish());
        Ok(())
    }

    fn process_frame(&mut self, events: &mut Vec<ClientEvent>) -> Result<bool> {
        if self.recv.len() < 4 {
            return Ok(false);
        }
        let len = u32::from_be_bytes([self.recv[0], self.recv[1], self.recv[2], self.recv[3]]);
        if len < FRAME_HEADER_LEN as u32 || len > MAX_FRAME_LEN {
            return Err(ClientError::Handshake("frame length out of range"));
        }
        if self.recv.len() < len as usize {
            return Ok(false);
        }
        let frame = self.recv.split_to(len as usize).freeze();

        let mut ebuf = std::mem::take(&mut self.env_buf);
        let mut skipped: Option<ProtocolError> = None;
        let result = match decode_envelope(&frame, &mut ebuf) {
            // 8-byte keepalive: daemon liveness only
            Ok(None) => Ok(()),
            Ok(Some(env)) => match self.state {
                ClientState::InitRecv => self.recv_initresp(&frame, env.sub),
                ClientState::ConnRecv => self.recv_connected(env.sub, events),
                ClientState::DataRecv => {
                    self.recv_delivery(&env, events);
                    Ok(())
                }
                _ => unreachable!("frame states only"),
            },
            Err(e) => {
                skipped = Some(e);
                Ok(())
            }
        };
        self.env_buf = ebuf;

        if let Some(e) = skipped {
            self.frame_errors += 1;
            warn!(error = %e, "skipping malformed frame");
            return Ok(true);
        }
        result?;
        Ok(true)
    }

    fn recv_initresp(&mut self, frame: &[u8], sub: &str) -> Result<()> {
        if sub == INITREFUSED_SUBJECT {
            let rdr = FieldReader::new(frame)?;
            let code = rdr
                .find("error")?
                .map(|f| f.as_i32())
                .transpose()?
                .unwrap_or(-1);
            return Err(ProtocolError::StartHostFailed(code).into());
        }
        if sub != INITRESP_SUBJECT {
            return Err(ClientError::Handshake("expected RVD.INITRESP"));
        }

        let rdr = FieldReader::new(frame)?;
        if let Some(field) = rdr.find("ipaddr")? {
            let arr: [u8; 4] = field
                .data
                .try_into()
                .map_err(|_| ProtocolError::BadFormat("ipaddr field is not 4 bytes"))?;
            self.ipaddr = u32::from_be_bytes(arr);
        }
        if let Some(field) = rdr.find("ipport")? {
            let arr: [u8; 2] = field
                .data
                .try_into()
                .map_err(|_| ProtocolError::BadFormat("ipport field is not 2 bytes"))?;
            self.ipport = u16::from_be_bytes(arr);
        }
        if let Some(field) = rdr.find("gob")? {
            self.gob = field.as_i32()? as u32;
        }

        self.session = synthesize_session(self.ipaddr, self.gob);
        self.control = format!("_INBOX.{}.1", self.session);
        debug!(session = %self.session, "session synthesized");

        let session = self.session.clone();
        self.send_init(Some(&session))?;
        self.state = ClientState::ConnRecv;
        Ok(())
    }

    fn recv_connected(&mut self, sub: &str, events: &mut Vec<ClientEvent>) -> Result<()> {
        if sub != CONNECTED_SUBJECT {
            return Err(ClientError::Handshake("expected RVD.CONNECTED"));
        }

        // Claim the whole inbox space of this session
        let inbox_pattern = format!("_INBOX.{}.>", self.session);
        self.pat_tab.put(&inbox_pattern)?;
        self.out
            .extend_from_slice(&encode_subscribe(&inbox_pattern)?);

        self.state = ClientState::DataRecv;
        if !self.save_buf.is_empty() {
            let pending = self.save_buf.split();
            self.out.extend_from_slice(&pending);
        }
        info!(session = %self.session, "session connected");
        events.push(ClientEvent::Connected {
            session: self.session.clone(),
        });
        Ok(())
    }

    fn recv_delivery(&mut self, env: &rvbus_protocol::Envelope<'_>, events: &mut Vec<ClientEvent>) {
        match env.mtype {
            Mtype::Data | Mtype::Advisory => {
                let (exact, _) = self.sub_tab.find(env.sub);
                if exact {
                    self.sub_tab.increment_match_count(env.sub);
                }
                self.pat_tab.match_subject(env.sub);

                // data is always present for D and A
                let data = match env.data {
                    Some(d) => d,
                    None => return,
                };
                events.push(ClientEvent::Message {
                    mtype: env.mtype,
                    subject: env.sub.to_string(),
                    reply: env.reply.map(str::to_string),
                    ftype: data.ftype,
                    payload: Bytes::copy_from_slice(data.bytes),
                });
            }
            // The daemon never sends subscription or init traffic
            other => {
                trace!(mtype = other.as_str(), sub = env.sub, "ignoring unexpected mtype");
            }
        }
    }

    fn queue_send(&mut self, frame: &[u8]) {
        if self.no_write {
            return;
        }
        if self.state == ClientState::DataRecv {
            self.out.extend_from_slice(frame);
        } else {
            // Held until the session is confirmed
            self.save_buf.extend_from_slice(frame);
        }
    }

    /// Publish to a concrete subject
    ///
    /// Before the session is confirmed the frame is buffered and flushed
    /// on connect. Null sessions accept and drop publishes.
    pub fn publish(
        &mut self,
        subject: &str,
        reply: Option<&str>,
        ftype: FieldType,
        payload: &[u8],
    ) -> Result<()> {
        let frame = encode_publish(Mtype::Data, subject, reply, ftype, payload)?;
        self.queue_send(&frame);
        Ok(())
    }

    /// Subscribe to a subject or wildcard pattern
    pub fn subscribe(&mut self, subject: &str) -> Result<()> {
        if is_wildcard(subject) {
            match self.pat_tab.put(subject)? {
                PatternPut::Created { .. } => {
                    let frame = encode_subscribe(subject)?;
                    self.queue_send(&frame);
                }
                PatternPut::Exists { .. } => {}
            }
        } else {
            match self.sub_tab.put(subject) {
                SubPut::Created { .. } => {
                    let frame = encode_subscribe(subject)?;
                    self.queue_send(&frame);
                }
                SubPut::Exists { .. } => {}
            }
        }
        Ok(())
    }

    /// Drop one reference to a subscription
    pub fn unsubscribe(&mut self, subject: &str) -> Result<()> {
        let last = if is_wildcard(subject) {
            match self.pat_tab.remove(subject) {
                PatternRemove::Removed => true,
                PatternRemove::StillReferenced { .. } => false,
                PatternRemove::NotFound => {
                    warn!(subject, "unsubscribe for unknown pattern");
                    return Ok(());
                }
            }
        } else {
            match self.sub_tab.remove(subject) {
                SubRemove::Removed { .. } => true,
                SubRemove::StillReferenced { .. } => false,
                SubRemove::NotFound => {
                    warn!(subject, "unsubscribe for unknown subject");
                    return Ok(());
                }
            }
        };
        if last {
            let frame = encode_unsubscribe(subject)?;
            self.queue_send(&frame);
        }
        Ok(())
    }

    /// Queue an 8-byte keepalive frame
    pub fn send_keepalive(&mut self) {
        let frame = MsgWriter::new().finish();
        self.queue_send(&frame);
    }
}

/// Session identity: peer address, session ordinal and wall-clock seconds
fn synthesize_session(ipaddr: u32, gob: u32) -> String {
    format!("{ipaddr:08X}.{gob}.{}", unix_secs())
}
