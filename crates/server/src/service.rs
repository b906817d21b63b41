//! Daemon-side session state machine
//!
//! One `RvService` lives per accepted connection. It is sans-I/O: the
//! connection task feeds raw socket bytes into [`RvService::on_bytes`],
//! delivers fabric messages through [`RvService::on_publish`] and ticks the
//! heartbeat with [`RvService::on_timer`]; everything the peer should
//! receive accumulates in an output buffer drained by
//! [`RvService::take_output`].
//!
//! # Handshake
//!
//! ```text
//! state        peer sends                daemon replies
//! VersionRecv  12-byte version record    12-byte version record
//! InfoRecv     64-byte info record       64-byte final info record
//! InfoRecv     'I' init envelope         RVD.INITRESP envelope
//! DataRecv     'I' init (with session)   RVD.CONNECTED advisory
//! DataRecv     D/A/L/C envelopes         deliveries, advisories
//! ```
//!
//! The two frame shapes in `InfoRecv` are distinguished by the leading
//! 32-bit word: an info record starts with a small word value, an envelope
//! with its frame length of at least 8.
//!
//! # Design
//!
//! A malformed frame inside `DataRecv` is skipped as a unit and counted;
//! the length prefix keeps the stream synchronized. Handshake violations
//! are fatal to the session.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, trace, warn};

use rvbus_protocol::{
    decode_envelope, encode_publish, is_restricted_subject, is_wildcard, Envelope, EnvelopeBuf,
    FieldReader, FieldType, InfoRecord, Mtype, MsgWriter, ProtocolError, ServicePrefix,
    VersionRecord, CONNECTED_SUBJECT, FRAME_HEADER_LEN, INFO_RECORD_LEN, INITRESP_SUBJECT,
    MAX_FRAME_LEN, VERSION_RECORD_LEN,
};
use rvbus_routing::{
    ConnId, Fabric, FlowControl, PatternMap, PatternPut, PatternRemove, Publish, SubMap, SubPut,
    SubRemove,
};

use crate::advisory;
use crate::error::{Result, ServerError};

/// Handshake progress of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the peer's 12-byte version record
    VersionRecv,
    /// Version exchanged, negotiating info records and init
    InfoRecv,
    /// Steady state, envelopes flow
    DataRecv,
}

/// Per-session constants fixed at accept time
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Peer IPv4 address, host order
    pub ipaddr: u32,
    /// Peer TCP port
    pub ipport: u16,
    /// Daemon-unique session ordinal
    pub gob: u64,
    /// Optional service namespace
    pub service: Option<String>,
    /// Log a trace line per frame
    pub trace_frames: bool,
}

/// Session counters, folded into listener metrics at close
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub msgs_recv: u64,
    pub msgs_sent: u64,
    pub frame_errors: u64,
}

/// Low 32 bits of a counter as the signed wire integer
///
/// Wire integers are 4 bytes; 64-bit counters wrap onto them modulo 2^32,
/// which round-trips through the peer's unsigned reinterpretation.
pub(crate) fn wire_int(v: u64) -> i32 {
    (v & u64::from(u32::MAX)) as i32
}

/// Daemon-side session state machine
pub struct RvService {
    fabric: Arc<dyn Fabric>,
    conn: ConnId,
    prefix: ServicePrefix,
    state: SessionState,

    sub_tab: SubMap,
    pat_tab: PatternMap,

    env_buf: EnvelopeBuf,
    recv: BytesMut,
    out: BytesMut,

    session: String,
    userid: String,

    ipaddr: u32,
    ipport: u16,
    gob: u64,

    sent_rvdconn: bool,
    sent_session_start: bool,
    sent_session_stop: bool,
    backpressure: bool,
    trace_frames: bool,
    daemon_session: bool,

    timer_id: u64,
    started: Option<Instant>,
    stats: SessionStats,
}

impl RvService {
    /// Build a session over an already-attached fabric connection
    pub fn new(fabric: Arc<dyn Fabric>, conn: ConnId, config: ServiceConfig) -> Self {
        Self {
            fabric,
            conn,
            prefix: ServicePrefix::new(config.service.as_deref()),
            state: SessionState::VersionRecv,
            sub_tab: SubMap::new(),
            pat_tab: PatternMap::new(),
            env_buf: EnvelopeBuf::new(),
            recv: BytesMut::with_capacity(4096),
            out: BytesMut::with_capacity(4096),
            session: String::new(),
            userid: String::new(),
            ipaddr: config.ipaddr,
            ipport: config.ipport,
            gob: config.gob,
            sent_rvdconn: false,
            sent_session_start: false,
            sent_session_stop: false,
            backpressure: false,
            trace_frames: config.trace_frames,
            daemon_session: false,
            timer_id: 0,
            started: None,
            stats: SessionStats::default(),
        }
    }

    /// Current handshake state
    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session identifier, empty until the peer completes its init
    #[inline]
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Peer-reported user identifier
    #[inline]
    pub fn userid(&self) -> &str {
        &self.userid
    }

    /// True when the peer synthesized its own session identifier
    #[inline]
    pub fn is_daemon_session(&self) -> bool {
        self.daemon_session
    }

    /// Fabric connection id
    #[inline]
    pub fn conn(&self) -> ConnId {
        self.conn
    }

    /// Current heartbeat timer id, zero when no timer is armed
    #[inline]
    pub fn timer_id(&self) -> u64 {
        self.timer_id
    }

    /// Session counters
    #[inline]
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Distinct exact subscriptions held by this session
    #[inline]
    pub fn sub_count(&self) -> usize {
        self.sub_tab.sub_count()
    }

    /// Distinct wildcard subscriptions held by this session
    #[inline]
    pub fn pattern_count(&self) -> usize {
        self.pat_tab.pattern_count()
    }

    /// True when the last forward hit a full delivery queue
    #[inline]
    pub fn is_backpressured(&self) -> bool {
        self.backpressure
    }

    /// Resume reads after relief
    #[inline]
    pub fn clear_backpressure(&mut self) {
        self.backpressure = false;
    }

    /// True when output bytes are pending for the socket
    #[inline]
    pub fn has_output(&self) -> bool {
        !self.out.is_empty()
    }

    /// Drain everything queued for the peer
    pub fn take_output(&mut self) -> Bytes {
        self.out.split().freeze()
    }

    /// Feed raw socket bytes and run the state machine
    ///
    /// # Errors
    ///
    /// Returns an error only for conditions fatal to the session; malformed
    /// steady-state frames are skipped and counted instead.
    pub fn on_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.recv.extend_from_slice(bytes);
        loop {
            let progressed = match self.state {
                SessionState::VersionRecv => self.process_version()?,
                SessionState::InfoRecv => self.process_info()?,
                SessionState::DataRecv => self.process_data()?,
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    fn process_version(&mut self) -> Result<bool> {
        if self.recv.len() < VERSION_RECORD_LEN {
            return Ok(false);
        }
        let raw = self.recv.split_to(VERSION_RECORD_LEN);
        let vers = VersionRecord::decode(&raw)?;
        if self.trace_frames {
            trace!(conn = %self.conn, words = ?vers.words, "version record received");
        }
        VersionRecord::LOCAL.encode(&mut self.out);
        self.state = SessionState::InfoRecv;
        Ok(true)
    }

    fn peek_len(&self) -> Option<u32> {
        if self.recv.len() < 4 {
            return None;
        }
        Some(u32::from_be_bytes([
            self.recv[0],
            self.recv[1],
            self.recv[2],
            self.recv[3],
        ]))
    }

    fn process_info(&mut self) -> Result<bool> {
        let Some(word) = self.peek_len() else {
            return Ok(false);
        };

        if (word as usize) < FRAME_HEADER_LEN {
            // Raw info record: the first word is a small negotiation value
            if self.recv.len() < INFO_RECORD_LEN {
                return Ok(false);
            }
            let raw = self.recv.split_to(INFO_RECORD_LEN);
            let info = InfoRecord::decode(&raw)?;
            if info.is_final() {
                return Err(ServerError::Handshake("final info record from peer"));
            }
            InfoRecord::final_record().encode(&mut self.out);
            return Ok(true);
        }

        let Some(frame) = self.next_frame(word)? else {
            return Ok(false);
        };
        let mut ebuf = std::mem::take(&mut self.env_buf);
        let result = (|| -> Result<()> {
            let env = decode_envelope(&frame, &mut ebuf)?
                .ok_or(ServerError::Handshake("keepalive before session start"))?;
            if env.mtype != Mtype::Init {
                return Err(ServerError::Handshake("expected init envelope"));
            }
            self.respond_init(&frame, &env)
        })();
        self.env_buf = ebuf;
        result?;
        Ok(true)
    }

    /// Split one complete frame off the receive buffer, or None to wait
    fn next_frame(&mut self, len: u32) -> Result<Option<Bytes>> {
        if len < FRAME_HEADER_LEN as u32 || len > MAX_FRAME_LEN {
            return Err(ServerError::BadFrameLength(len));
        }
        if self.recv.len() < len as usize {
            return Ok(None);
        }
        Ok(Some(self.recv.split_to(len as usize).freeze()))
    }

    /// Answer the first init envelope with RVD.INITRESP
    fn respond_init(&mut self, frame: &[u8], env: &Envelope<'_>) -> Result<()> {
        let rdr = FieldReader::new(frame)?;
        if let Some(field) = rdr.find("userid")? {
            self.userid = field.as_str()?.to_string();
        }
        debug!(
            conn = %self.conn,
            sub = env.sub,
            userid = %self.userid,
            "init received"
        );

        let mut w = MsgWriter::new();
        w.append_string("mtype", Mtype::Init.as_str());
        w.append_subject("sub", INITRESP_SUBJECT)?;
        w.append_ipdata("ipaddr", &self.ipaddr.to_be_bytes());
        w.append_ipdata("ipport", &self.ipport.to_be_bytes());
        w.append_int("gob", wire_int(self.gob));
        self.out.extend_from_slice(&w.finish());

        self.state = SessionState::DataRecv;
        Ok(())
    }

    fn process_data(&mut self) -> Result<bool> {
        let Some(len) = self.peek_len() else {
            return Ok(false);
        };
        let Some(frame) = self.next_frame(len)? else {
            return Ok(false);
        };

        let mut ebuf = std::mem::take(&mut self.env_buf);
        let mut skipped: Option<ProtocolError> = None;
        let result = match decode_envelope(&frame, &mut ebuf) {
            // Keepalive: peer liveness only, nothing to answer
            Ok(None) => Ok(()),
            Ok(Some(env)) => self.dispatch(&frame, &env),
            Err(e) => {
                skipped = Some(e);
                Ok(())
            }
        };
        self.env_buf = ebuf;

        if let Some(e) = skipped {
            self.frame_error("envelope", &e);
            return Ok(true);
        }
        result?;
        Ok(true)
    }

    fn frame_error(&mut self, context: &'static str, err: &ProtocolError) {
        self.stats.frame_errors += 1;
        warn!(conn = %self.conn, context, error = %err, "skipping malformed frame");
    }

    fn dispatch(&mut self, frame: &[u8], env: &Envelope<'_>) -> Result<()> {
        if self.trace_frames {
            trace!(conn = %self.conn, mtype = env.mtype.as_str(), sub = env.sub, "frame received");
        }
        match env.mtype {
            Mtype::Data | Mtype::Advisory => self.on_data(env),
            Mtype::Listen => {
                self.on_listen(env.sub);
                Ok(())
            }
            Mtype::Cancel => {
                self.on_cancel(env.sub);
                Ok(())
            }
            Mtype::Init => self.complete_session(frame),
        }
    }

    /// Second init envelope completes session setup
    ///
    /// A peer that reports its own synthesized session is a daemon-style
    /// session; one that omits the field gets a session assigned here
    /// (direct session) and learns it from the connected advisory.
    fn complete_session(&mut self, frame: &[u8]) -> Result<()> {
        if self.sent_rvdconn {
            // Duplicate init is noise, not a violation
            return Ok(());
        }
        let rdr = FieldReader::new(frame)?;
        match rdr.find("session")? {
            Some(session) => {
                self.session = session.as_str()?.to_string();
                self.daemon_session = true;
            }
            None => {
                let secs = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default();
                self.session = format!("{:08X}.{}.{secs}", self.ipaddr, self.gob);
            }
        }

        let connected = encode_publish(
            Mtype::Advisory,
            CONNECTED_SUBJECT,
            None,
            FieldType::String,
            self.session.as_bytes(),
        )?;
        self.out.extend_from_slice(&connected);
        self.sent_rvdconn = true;
        self.timer_id = self.gob;
        self.started = Some(Instant::now());

        self.advise(advisory::session_start(&self.session), &self.session);
        self.sent_session_start = true;
        info!(
            conn = %self.conn,
            session = %self.session,
            userid = %self.userid,
            daemon_session = self.daemon_session,
            "session started"
        );
        Ok(())
    }

    /// Map a wire subject into the fabric namespace
    ///
    /// Administrative and inbox subjects stay daemon-global; everything else
    /// is namespaced by the configured service.
    fn fab_subject(&self, subject: &str) -> String {
        if is_restricted_subject(subject) {
            subject.to_string()
        } else {
            self.prefix.concat(subject)
        }
    }

    /// Recover the wire subject from a fabric subject
    fn wire_subject<'a>(&self, subject: &'a str) -> Option<&'a str> {
        if is_restricted_subject(subject) {
            Some(subject)
        } else {
            self.prefix.strip(subject)
        }
    }

    fn on_data(&mut self, env: &Envelope<'_>) -> Result<()> {
        // Envelope decoding guarantees the data field for D and A
        let data = env.data.ok_or(ProtocolError::BadData)?;
        self.stats.msgs_recv += 1;

        let msg = Publish {
            subject: self.fab_subject(env.sub),
            reply: env.reply.map(|r| self.fab_subject(r)),
            ftype: data.ftype,
            payload: Bytes::copy_from_slice(data.bytes),
            source: self.conn,
        };
        if self.fabric.forward(msg) == FlowControl::Backpressure {
            self.backpressure = true;
        }
        Ok(())
    }

    fn on_listen(&mut self, subject: &str) {
        if is_wildcard(subject) {
            match self.pat_tab.put(subject) {
                Ok(PatternPut::Created { .. }) => {
                    let fab = self.fab_subject(subject);
                    match self.fabric.add_pattern(self.conn, &fab) {
                        Ok(true) => {
                            debug!(conn = %self.conn, subject, "pattern hash contended daemon-wide");
                        }
                        Ok(false) => {}
                        Err(e) => {
                            self.frame_error("pattern", &e);
                            self.pat_tab.remove(subject);
                            return;
                        }
                    }
                    if advisory::should_advertise(subject) {
                        self.advise(advisory::listen_start(subject), subject);
                    }
                }
                Ok(PatternPut::Exists { refcnt, .. }) => {
                    trace!(conn = %self.conn, subject, refcnt, "pattern refcount bumped");
                }
                Err(e) => self.frame_error("pattern", &e),
            }
        } else {
            match self.sub_tab.put(subject) {
                SubPut::Created { .. } => {
                    let fab = self.fab_subject(subject);
                    let contended = self.fabric.add_subscription(self.conn, &fab);
                    if contended {
                        debug!(conn = %self.conn, subject, "subject hash contended daemon-wide");
                    }
                    if advisory::should_advertise(subject) {
                        self.advise(advisory::listen_start(subject), subject);
                    }
                }
                SubPut::Exists { refcnt, .. } => {
                    trace!(conn = %self.conn, subject, refcnt, "subscription refcount bumped");
                }
            }
        }
    }

    fn on_cancel(&mut self, subject: &str) {
        if is_wildcard(subject) {
            match self.pat_tab.remove(subject) {
                PatternRemove::Removed => {
                    let fab = self.fab_subject(subject);
                    self.fabric.del_pattern(self.conn, &fab);
                    if advisory::should_advertise(subject) {
                        self.advise(advisory::listen_stop(subject), subject);
                    }
                }
                PatternRemove::StillReferenced { .. } => {}
                PatternRemove::NotFound => {
                    warn!(conn = %self.conn, subject, "cancel for unknown pattern");
                }
            }
        } else {
            match self.sub_tab.remove(subject) {
                SubRemove::Removed { .. } => {
                    let fab = self.fab_subject(subject);
                    self.fabric.del_subscription(self.conn, &fab);
                    if advisory::should_advertise(subject) {
                        self.advise(advisory::listen_stop(subject), subject);
                    }
                }
                SubRemove::StillReferenced { .. } => {}
                SubRemove::NotFound => {
                    warn!(conn = %self.conn, subject, "cancel for unknown subject");
                }
            }
        }
    }

    /// Publish an advisory onto the fabric, best effort
    fn advise(&self, subject: String, payload: &str) {
        let msg = Publish {
            subject,
            reply: None,
            ftype: FieldType::String,
            payload: Bytes::copy_from_slice(payload.as_bytes()),
            source: self.conn,
        };
        // Advisories never pause the session
        let _ = self.fabric.forward(msg);
    }

    /// Deliver a fabric message onto this session's wire
    ///
    /// The session re-matches against its own tables so counters stay
    /// correct; exact interest is consulted before wildcard interest, and
    /// a matching message is written once however many patterns hit.
    pub fn on_publish(&mut self, msg: &Publish) -> Result<()> {
        let Some(subject) = self.wire_subject(&msg.subject) else {
            return Ok(());
        };
        let (exact, _) = self.sub_tab.find(subject);
        if exact {
            self.sub_tab.increment_match_count(subject);
        }
        let pattern_hits = self.pat_tab.match_subject(subject);
        if !exact && pattern_hits == 0 {
            return Ok(());
        }

        let mtype = if subject.starts_with("_RV.") {
            Mtype::Advisory
        } else {
            Mtype::Data
        };
        let reply = msg.reply.as_deref().and_then(|r| self.wire_subject(r));
        let frame = encode_publish(mtype, subject, reply, msg.ftype, &msg.payload)?;
        if self.trace_frames {
            trace!(conn = %self.conn, subject, len = frame.len(), "frame delivered");
        }
        self.out.extend_from_slice(&frame);
        self.stats.msgs_sent += 1;
        Ok(())
    }

    /// Heartbeat tick; returns false for a stale or unarmed timer
    pub fn on_timer(&mut self, timer_id: u64) -> Result<bool> {
        if self.timer_id == 0 || timer_id != self.timer_id {
            return Ok(false);
        }
        let uptime = self
            .started
            .map(|t| t.elapsed().as_secs())
            .unwrap_or_default();

        let mut inner = MsgWriter::new();
        inner.append_int("uptime", wire_int(uptime));
        inner.append_int("ms", wire_int(self.stats.msgs_sent));
        inner.append_int("mr", wire_int(self.stats.msgs_recv));
        let status = inner.finish();

        let frame = encode_publish(
            Mtype::Advisory,
            &advisory::host_status(self.ipaddr),
            None,
            FieldType::Message,
            &status,
        )?;
        self.out.extend_from_slice(&frame);
        Ok(true)
    }

    /// Tear the session down: advisories out, tables drained, fabric left
    ///
    /// Idempotent; the connection task calls it on every exit path.
    pub fn close(&mut self) {
        self.timer_id = 0;

        for entry in self.sub_tab.drain() {
            let fab = self.fab_subject(&entry.subject);
            self.fabric.del_subscription(self.conn, &fab);
            if advisory::should_advertise(&entry.subject) {
                self.advise(advisory::listen_stop(&entry.subject), &entry.subject);
            }
        }
        for pattern in self.pat_tab.drain() {
            let fab = self.fab_subject(&pattern);
            self.fabric.del_pattern(self.conn, &fab);
            if advisory::should_advertise(&pattern) {
                self.advise(advisory::listen_stop(&pattern), &pattern);
            }
        }

        if self.sent_session_start && !self.sent_session_stop {
            self.advise(advisory::session_stop(&self.session), &self.session);
            self.sent_session_stop = true;
            info!(conn = %self.conn, session = %self.session, "session stopped");
        }
        self.fabric.detach(self.conn);
    }
}
