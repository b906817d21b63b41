//! Flow-control tests over real sockets
//!
//! A session whose publish hit a full delivery queue pauses its reads, but
//! nothing else: messages routed to it keep flowing and its heartbeat keeps
//! ticking while it waits for relief. A consumer attached straight to the
//! fabric with a depth-1 queue it never drains forces the backpressure.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use rvbus_client::{ClientEvent, DaemonAddr, RvConnection, SessionParams};
use rvbus_config::DaemonConfig;
use rvbus_protocol::FieldType;
use rvbus_routing::{BusFabric, Fabric, Publish};
use rvbus_server::RvListener;

const WAIT: Duration = Duration::from_secs(5);

async fn start_daemon(fabric: Arc<BusFabric>) -> DaemonAddr {
    let config = DaemonConfig {
        address: "127.0.0.1".to_string(),
        delivery_queue: 1,
        status_interval_secs: 1,
        ..DaemonConfig::default()
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(RvListener::new(config, fabric).serve(listener));
    DaemonAddr::Tcp {
        host: "127.0.0.1".to_string(),
        port,
    }
}

/// Drain events until a message on `subject` arrives, returning its payload
async fn recv_on(conn: &mut RvConnection, subject: &str) -> Vec<u8> {
    loop {
        if let ClientEvent::Message {
            subject: got,
            payload,
            ..
        } = conn.next_event().await.unwrap()
        {
            if got == subject {
                return payload.to_vec();
            }
        }
    }
}

/// Drain events until a message whose subject starts with `prefix` arrives
async fn recv_prefixed(conn: &mut RvConnection, prefix: &str) -> String {
    loop {
        if let ClientEvent::Message { subject, .. } = conn.next_event().await.unwrap() {
            if subject.starts_with(prefix) {
                return subject;
            }
        }
    }
}

#[tokio::test]
async fn test_backpressured_session_keeps_delivering() {
    let fabric = Arc::new(BusFabric::new());

    // A fabric consumer that never drains; one queued message fills it
    let (slow_tx, _slow_rx) = mpsc::channel::<Publish>(1);
    let slow = fabric.attach(slow_tx);
    fabric.add_subscription(slow, "SLOW.TOPIC");

    let addr = start_daemon(Arc::clone(&fabric)).await;

    let mut blocked = RvConnection::connect(&addr, SessionParams::default())
        .await
        .unwrap();
    blocked.subscribe("TO.BLOCKED").await.unwrap();
    blocked.subscribe("_RV.INFO.SYSTEM.>").await.unwrap();

    let mut witness = RvConnection::connect(&addr, SessionParams::default())
        .await
        .unwrap();
    witness.subscribe("TO.WITNESS").await.unwrap();

    // Two publishes into the stuck queue: the second hits it full and the
    // session pauses its reads
    for _ in 0..2 {
        blocked
            .publish("SLOW.TOPIC", None, FieldType::String, b"jam")
            .await
            .unwrap();
    }
    sleep(Duration::from_millis(300)).await;

    // Deliveries still reach the paused session
    witness
        .publish("TO.BLOCKED", None, FieldType::String, b"ping")
        .await
        .unwrap();
    let payload = timeout(WAIT, recv_on(&mut blocked, "TO.BLOCKED"))
        .await
        .expect("delivery must not stall behind backpressure");
    assert_eq!(payload, b"ping");

    // The heartbeat still ticks
    let status = timeout(
        WAIT,
        recv_prefixed(&mut blocked, "_RV.INFO.SYSTEM.HOST.STATUS."),
    )
    .await
    .expect("heartbeat must not stall behind backpressure");
    assert!(status.starts_with("_RV.INFO.SYSTEM.HOST.STATUS."));

    // Relief: the stuck consumer departs, reads resume, traffic flows again
    fabric.detach(slow);
    blocked
        .publish("TO.WITNESS", None, FieldType::String, b"pong")
        .await
        .unwrap();
    let payload = timeout(WAIT, recv_on(&mut witness, "TO.WITNESS"))
        .await
        .expect("reads must resume after relief");
    assert_eq!(payload, b"pong");

    blocked.close().await.unwrap();
    witness.close().await.unwrap();
}
