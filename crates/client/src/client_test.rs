//! Tests for the client session state machine
//!
//! The daemon side of each exchange is built by hand with the protocol
//! writers, so every test drives the machine with real wire bytes.

use bytes::{Bytes, BytesMut};

use rvbus_protocol::{
    decode_envelope, encode_publish, EnvelopeBuf, FieldReader, FieldType, InfoRecord, Mtype,
    MsgWriter, ProtocolError, VersionRecord, CONNECTED_SUBJECT, INIT_SUBJECT, INITREFUSED_SUBJECT,
    INITRESP_SUBJECT, INFO_RECORD_LEN, VERSION_RECORD_LEN,
};

use super::client::{ClientEvent, ClientState, RvClient, SessionParams};
use super::error::ClientError;

const TEST_IPADDR: u32 = 0x7f00_0001;
const TEST_GOB: i32 = 7;

// ============================================================
// Helpers
// ============================================================

fn params() -> SessionParams {
    SessionParams::default()
}

fn daemon_version() -> BytesMut {
    let mut buf = BytesMut::new();
    VersionRecord::LOCAL.encode(&mut buf);
    buf
}

fn final_info() -> BytesMut {
    let mut buf = BytesMut::new();
    InfoRecord::final_record().encode(&mut buf);
    buf
}

fn initresp_frame(gob: i32) -> Bytes {
    let mut w = MsgWriter::new();
    w.append_string("mtype", Mtype::Init.as_str());
    w.append_subject("sub", INITRESP_SUBJECT).unwrap();
    w.append_ipdata("ipaddr", &TEST_IPADDR.to_be_bytes());
    w.append_ipdata("ipport", &4500u16.to_be_bytes());
    w.append_int("gob", gob);
    w.finish()
}

fn refused_frame(code: i32) -> Bytes {
    let mut w = MsgWriter::new();
    w.append_string("mtype", Mtype::Init.as_str());
    w.append_subject("sub", INITREFUSED_SUBJECT).unwrap();
    w.append_int("error", code);
    w.finish()
}

fn connected_frame(session: &str) -> Bytes {
    encode_publish(
        Mtype::Advisory,
        CONNECTED_SUBJECT,
        None,
        FieldType::String,
        session.as_bytes(),
    )
    .unwrap()
}

fn data_frame(subject: &str, payload: &[u8]) -> Bytes {
    encode_publish(Mtype::Data, subject, None, FieldType::Opaque, payload).unwrap()
}

/// Drive a fresh client through the whole handshake; returns it connected
/// along with the events emitted by the final step.
fn connect(client: &mut RvClient) -> Vec<ClientEvent> {
    client.take_output();
    client.on_bytes(&daemon_version()).unwrap();
    client.take_output();
    client.on_bytes(&final_info()).unwrap();
    client.take_output();
    client.on_bytes(&initresp_frame(TEST_GOB)).unwrap();
    client.take_output();
    let session = client.session().to_string();
    client.on_bytes(&connected_frame(&session)).unwrap()
}

/// Split a byte run into its length-prefixed frames
fn split_frames(mut bytes: Bytes) -> Vec<Bytes> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        frames.push(bytes.split_to(len));
    }
    frames
}

fn frame_subject(frame: &[u8]) -> (Mtype, String) {
    let mut buf = EnvelopeBuf::new();
    let env = decode_envelope(frame, &mut buf).unwrap().unwrap();
    (env.mtype, env.sub.to_string())
}

// ============================================================
// Handshake sequencing
// ============================================================

#[test]
fn test_initial_output_is_version_record() {
    let mut client = RvClient::new(params());
    assert_eq!(client.state(), ClientState::VersionRecv);
    let out = client.take_output();
    assert_eq!(out.len(), VERSION_RECORD_LEN);
    let vers = VersionRecord::decode(&out).unwrap();
    assert_eq!(vers.words, VersionRecord::LOCAL.words);
}

#[test]
fn test_version_reply_is_fresh_info() {
    let mut client = RvClient::new(params());
    client.take_output();
    let events = client.on_bytes(&daemon_version()).unwrap();
    assert!(events.is_empty());
    assert_eq!(client.state(), ClientState::InfoRecv);
    let out = client.take_output();
    assert_eq!(out.len(), INFO_RECORD_LEN);
    let info = InfoRecord::decode(&out).unwrap();
    assert_eq!(info.words, InfoRecord::fresh().words);
}

#[test]
fn test_partial_version_record_waits() {
    let mut client = RvClient::new(params());
    client.take_output();
    let events = client.on_bytes(&daemon_version()[..5]).unwrap();
    assert!(events.is_empty());
    assert_eq!(client.state(), ClientState::VersionRecv);
    client.on_bytes(&daemon_version()[5..]).unwrap();
    assert_eq!(client.state(), ClientState::InfoRecv);
}

#[test]
fn test_nonfinal_info_is_fatal() {
    let mut client = RvClient::new(params());
    client.take_output();
    client.on_bytes(&daemon_version()).unwrap();
    let mut fresh = BytesMut::new();
    InfoRecord::fresh().encode(&mut fresh);
    let err = client.on_bytes(&fresh).unwrap_err();
    assert!(matches!(err, ClientError::Handshake(_)));
    assert!(!err.is_recoverable());
}

#[test]
fn test_final_info_triggers_init() {
    let mut client = RvClient::new(params());
    client.take_output();
    client.on_bytes(&daemon_version()).unwrap();
    client.take_output();
    client.on_bytes(&final_info()).unwrap();
    assert_eq!(client.state(), ClientState::InitRecv);

    let out = client.take_output();
    let (mtype, sub) = frame_subject(&out);
    assert_eq!(mtype, Mtype::Init);
    assert_eq!(sub, INIT_SUBJECT);

    let rdr = FieldReader::new(&out).unwrap();
    let userid = rdr.find("userid").unwrap().unwrap();
    assert_eq!(userid.as_str().unwrap(), "nobody");
    assert_eq!(rdr.find("vmaj").unwrap().unwrap().as_i32().unwrap(), 5);
    // No session yet on the first init
    assert!(rdr.find("session").unwrap().is_none());
}

#[test]
fn test_initresp_synthesizes_session() {
    let mut client = RvClient::new(params());
    client.take_output();
    client.on_bytes(&daemon_version()).unwrap();
    client.on_bytes(&final_info()).unwrap();
    client.take_output();
    client.on_bytes(&initresp_frame(TEST_GOB)).unwrap();
    assert_eq!(client.state(), ClientState::ConnRecv);
    assert!(client.session().starts_with("7F000001.7."));
    assert_eq!(client.endpoint(), (TEST_IPADDR, 4500));
    assert_eq!(client.control(), format!("_INBOX.{}.1", client.session()));

    // The second init carries the session back to the daemon
    let out = client.take_output();
    let rdr = FieldReader::new(&out).unwrap();
    let session = rdr.find("session").unwrap().unwrap();
    assert_eq!(session.as_str().unwrap(), client.session());
}

#[test]
fn test_init_refused_is_fatal() {
    let mut client = RvClient::new(params());
    client.take_output();
    client.on_bytes(&daemon_version()).unwrap();
    client.on_bytes(&final_info()).unwrap();
    client.take_output();
    let err = client.on_bytes(&refused_frame(17)).unwrap_err();
    match err {
        ClientError::Protocol(ProtocolError::StartHostFailed(code)) => assert_eq!(code, 17),
        other => panic!("expected StartHostFailed, got {other}"),
    }
}

#[test]
fn test_connected_completes_session() {
    let mut client = RvClient::new(params());
    let events = connect(&mut client);
    assert!(client.is_connected());
    assert_eq!(events.len(), 1);
    match &events[0] {
        ClientEvent::Connected { session } => assert_eq!(session, client.session()),
        other => panic!("expected Connected, got {other:?}"),
    }

    // The session inbox pattern is claimed on the wire
    let frames = split_frames(client.take_output());
    let (mtype, sub) = frame_subject(&frames[0]);
    assert_eq!(mtype, Mtype::Listen);
    assert_eq!(sub, format!("_INBOX.{}.>", client.session()));
}

#[test]
fn test_session_params_are_reported() {
    let params = SessionParams {
        userid: "ops".to_string(),
        service: Some("7500".to_string()),
        network: Some(";239.1.1.1".to_string()),
    };
    let mut client = RvClient::new(params);
    client.take_output();
    client.on_bytes(&daemon_version()).unwrap();
    client.take_output();
    client.on_bytes(&final_info()).unwrap();

    let out = client.take_output();
    let rdr = FieldReader::new(&out).unwrap();
    assert_eq!(rdr.find("userid").unwrap().unwrap().as_str().unwrap(), "ops");
    assert_eq!(rdr.find("service").unwrap().unwrap().as_str().unwrap(), "7500");
    assert_eq!(
        rdr.find("network").unwrap().unwrap().as_str().unwrap(),
        ";239.1.1.1"
    );
}

// ============================================================
// Buffered sends
// ============================================================

#[test]
fn test_sends_buffer_until_connected() {
    let mut client = RvClient::new(params());
    client.subscribe("FOO.BAR").unwrap();
    client.publish("FOO.BAR", None, FieldType::Opaque, b"early").unwrap();

    // Handshake traffic only until the session is confirmed
    client.take_output();
    client.on_bytes(&daemon_version()).unwrap();
    client.take_output();
    client.on_bytes(&final_info()).unwrap();
    let (mtype, _) = frame_subject(&client.take_output());
    assert_eq!(mtype, Mtype::Init);
    client.on_bytes(&initresp_frame(TEST_GOB)).unwrap();
    let (mtype, _) = frame_subject(&client.take_output());
    assert_eq!(mtype, Mtype::Init);

    let session = client.session().to_string();
    client.on_bytes(&connected_frame(&session)).unwrap();
    let frames = split_frames(client.take_output());
    assert_eq!(frames.len(), 3);
    // Inbox claim first, then the held frames in issue order
    let (_, inbox) = frame_subject(&frames[0]);
    assert!(inbox.starts_with("_INBOX."));
    let (mtype, sub) = frame_subject(&frames[1]);
    assert_eq!((mtype, sub.as_str()), (Mtype::Listen, "FOO.BAR"));
    let (mtype, sub) = frame_subject(&frames[2]);
    assert_eq!((mtype, sub.as_str()), (Mtype::Data, "FOO.BAR"));
}

// ============================================================
// Steady state
// ============================================================

#[test]
fn test_delivery_becomes_event() {
    let mut client = RvClient::new(params());
    connect(&mut client);
    client.take_output();

    client.subscribe("FOO.BAR").unwrap();
    let events = client.on_bytes(&data_frame("FOO.BAR", b"hello")).unwrap();
    assert_eq!(events.len(), 1);
    match &events[0] {
        ClientEvent::Message {
            mtype,
            subject,
            reply,
            payload,
            ..
        } => {
            assert_eq!(*mtype, Mtype::Data);
            assert_eq!(subject, "FOO.BAR");
            assert!(reply.is_none());
            assert_eq!(&payload[..], b"hello");
        }
        other => panic!("expected Message, got {other:?}"),
    }
}

#[test]
fn test_reply_subject_travels() {
    let mut client = RvClient::new(params());
    connect(&mut client);
    let frame = encode_publish(
        Mtype::Data,
        "FOO.BAR",
        Some("_INBOX.AABBCCDD.3.1700000000.2"),
        FieldType::Opaque,
        b"ask",
    )
    .unwrap();
    let events = client.on_bytes(&frame).unwrap();
    match &events[0] {
        ClientEvent::Message { reply, .. } => {
            assert_eq!(reply.as_deref(), Some("_INBOX.AABBCCDD.3.1700000000.2"));
        }
        other => panic!("expected Message, got {other:?}"),
    }
}

#[test]
fn test_advisory_delivery() {
    let mut client = RvClient::new(params());
    connect(&mut client);
    let frame = encode_publish(
        Mtype::Advisory,
        "_RV.INFO.SYSTEM.LISTEN.START.FOO",
        None,
        FieldType::String,
        b"FOO",
    )
    .unwrap();
    let events = client.on_bytes(&frame).unwrap();
    match &events[0] {
        ClientEvent::Message { mtype, subject, .. } => {
            assert_eq!(*mtype, Mtype::Advisory);
            assert_eq!(subject, "_RV.INFO.SYSTEM.LISTEN.START.FOO");
        }
        other => panic!("expected Message, got {other:?}"),
    }
}

#[test]
fn test_keepalive_produces_no_event() {
    let mut client = RvClient::new(params());
    connect(&mut client);
    let keepalive = MsgWriter::new().finish();
    let events = client.on_bytes(&keepalive).unwrap();
    assert!(events.is_empty());
}

#[test]
fn test_malformed_frame_skipped() {
    let mut client = RvClient::new(params());
    connect(&mut client);

    // Valid header, garbage body
    let mut bad = BytesMut::new();
    bad.extend_from_slice(&16u32.to_be_bytes());
    bad.extend_from_slice(&rvbus_protocol::FRAME_MAGIC.to_be_bytes());
    bad.extend_from_slice(&[0xff; 8]);
    let events = client.on_bytes(&bad).unwrap();
    assert!(events.is_empty());
    assert_eq!(client.frame_errors(), 1);

    // Stream survives
    let events = client.on_bytes(&data_frame("FOO.BAR", b"after")).unwrap();
    assert_eq!(events.len(), 1);
}

#[test]
fn test_oversize_frame_is_fatal() {
    let mut client = RvClient::new(params());
    connect(&mut client);
    let err = client.on_bytes(&u32::MAX.to_be_bytes()).unwrap_err();
    assert!(matches!(err, ClientError::Handshake(_)));
}

#[test]
fn test_partial_frame_reassembly() {
    let mut client = RvClient::new(params());
    connect(&mut client);
    let frame = data_frame("FOO.BAR", b"pieces");
    let events = client.on_bytes(&frame[..7]).unwrap();
    assert!(events.is_empty());
    let events = client.on_bytes(&frame[7..]).unwrap();
    assert_eq!(events.len(), 1);
}

// ============================================================
// Subscription bookkeeping
// ============================================================

#[test]
fn test_duplicate_subscribe_sends_once() {
    let mut client = RvClient::new(params());
    connect(&mut client);
    client.take_output();

    client.subscribe("FOO.BAR").unwrap();
    client.subscribe("FOO.BAR").unwrap();
    assert_eq!(client.sub_count(), 1);
    assert_eq!(split_frames(client.take_output()).len(), 1);

    // First unsubscribe only drops a reference
    client.unsubscribe("FOO.BAR").unwrap();
    assert!(!client.has_output());
    client.unsubscribe("FOO.BAR").unwrap();
    let frames = split_frames(client.take_output());
    let (mtype, sub) = frame_subject(&frames[0]);
    assert_eq!((mtype, sub.as_str()), (Mtype::Cancel, "FOO.BAR"));
    assert_eq!(client.sub_count(), 0);
}

#[test]
fn test_wildcard_subscribe() {
    let mut client = RvClient::new(params());
    connect(&mut client);
    client.take_output();

    client.subscribe("FOO.>").unwrap();
    assert_eq!(client.pattern_count(), 2); // session inbox pattern + FOO.>
    let frames = split_frames(client.take_output());
    let (mtype, sub) = frame_subject(&frames[0]);
    assert_eq!((mtype, sub.as_str()), (Mtype::Listen, "FOO.>"));
}

#[test]
fn test_bad_pattern_rejected() {
    let mut client = RvClient::new(params());
    connect(&mut client);
    assert!(client.subscribe("FOO.>.BAR").is_err());
}

#[test]
fn test_wildcard_publish_rejected() {
    let mut client = RvClient::new(params());
    connect(&mut client);
    assert!(client.publish("FOO.*", None, FieldType::Opaque, b"x").is_err());
}

// ============================================================
// Null sessions and inbox naming
// ============================================================

#[test]
fn test_null_session_is_ready() {
    let mut client = RvClient::null(params());
    assert!(client.is_connected());
    assert!(client.session().starts_with("7F000001.1."));
    assert_eq!(client.control(), format!("_INBOX.{}.1", client.session()));
    assert!(!client.has_output());
}

#[test]
fn test_null_session_never_writes() {
    let mut client = RvClient::null(params());
    client.subscribe("FOO.BAR").unwrap();
    client.publish("FOO.BAR", None, FieldType::Opaque, b"x").unwrap();
    client.send_keepalive();
    assert!(!client.has_output());
    // Local bookkeeping still happens
    assert_eq!(client.sub_count(), 1);
}

#[test]
fn test_make_inbox_sequence() {
    let mut client = RvClient::null(params());
    let session = client.session().to_string();
    let first = client.make_inbox();
    let second = client.make_inbox();
    assert_eq!(first, format!("_INBOX.{session}.2"));
    assert_eq!(second, format!("_INBOX.{session}.3"));
    assert_ne!(first, client.control());
}
