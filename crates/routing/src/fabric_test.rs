//! Tests for the routing fabric
//!
//! Tests drive the fabric directly through bounded channels, no sockets and
//! no runtime: `try_send`/`try_recv` are synchronous.

use bytes::Bytes;
use tokio::sync::mpsc;

use rvbus_protocol::{subject_hash, FieldType};

use crate::{BusFabric, ConnId, Fabric, FlowControl, Publish, SubEvent};

fn publish(source: ConnId, subject: &str) -> Publish {
    Publish {
        subject: subject.to_string(),
        reply: None,
        ftype: FieldType::Opaque,
        payload: Bytes::from_static(b"payload"),
        source,
    }
}

fn attach(fabric: &BusFabric, depth: usize) -> (ConnId, mpsc::Receiver<Publish>) {
    let (tx, rx) = mpsc::channel(depth);
    (fabric.attach(tx), rx)
}

// =============================================================================
// Fan-out
// =============================================================================

#[test]
fn test_forward_reaches_exact_subscriber() {
    let fabric = BusFabric::new();
    let (pub_id, _pub_rx) = attach(&fabric, 8);
    let (sub_id, mut sub_rx) = attach(&fabric, 8);

    fabric.add_subscription(sub_id, "FOO.BAR");
    assert_eq!(
        fabric.forward(publish(pub_id, "FOO.BAR")),
        FlowControl::Accepted
    );

    let got = sub_rx.try_recv().unwrap();
    assert_eq!(got.subject, "FOO.BAR");
    assert_eq!(got.source, pub_id);
    assert!(sub_rx.try_recv().is_err());
}

#[test]
fn test_forward_skips_source_session() {
    let fabric = BusFabric::new();
    let (id, mut rx) = attach(&fabric, 8);
    fabric.add_subscription(id, "FOO");
    fabric.forward(publish(id, "FOO"));
    // No echo back to the publisher
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_forward_no_subscriber_is_accepted() {
    let fabric = BusFabric::new();
    let (id, _rx) = attach(&fabric, 8);
    assert_eq!(
        fabric.forward(publish(id, "NOBODY.HOME")),
        FlowControl::Accepted
    );
}

#[test]
fn test_forward_through_pattern() {
    let fabric = BusFabric::new();
    let (pub_id, _pub_rx) = attach(&fabric, 8);
    let (sub_id, mut sub_rx) = attach(&fabric, 8);

    fabric.add_pattern(sub_id, "FOO.>").unwrap();
    fabric.forward(publish(pub_id, "FOO.A.B"));
    assert_eq!(sub_rx.try_recv().unwrap().subject, "FOO.A.B");
    fabric.forward(publish(pub_id, "BAR.A"));
    assert!(sub_rx.try_recv().is_err());
}

#[test]
fn test_exact_and_pattern_deliver_once() {
    let fabric = BusFabric::new();
    let (pub_id, _pub_rx) = attach(&fabric, 8);
    let (sub_id, mut sub_rx) = attach(&fabric, 8);

    // Overlapping interest still delivers a single copy per session
    fabric.add_subscription(sub_id, "FOO.BAR");
    fabric.add_pattern(sub_id, "FOO.>").unwrap();
    fabric.forward(publish(pub_id, "FOO.BAR"));
    assert!(sub_rx.try_recv().is_ok());
    assert!(sub_rx.try_recv().is_err());
}

#[test]
fn test_broad_pattern_never_sees_restricted() {
    let fabric = BusFabric::new();
    let (pub_id, _pub_rx) = attach(&fabric, 8);
    let (sub_id, mut sub_rx) = attach(&fabric, 8);

    fabric.add_pattern(sub_id, ">").unwrap();
    fabric.forward(publish(pub_id, "_RV.INFO.SYSTEM.SESSION.START.X"));
    fabric.forward(publish(pub_id, "_INBOX.7F000001.1.9"));
    assert!(sub_rx.try_recv().is_err());

    fabric.forward(publish(pub_id, "PLAIN.SUBJECT"));
    assert!(sub_rx.try_recv().is_ok());
}

#[test]
fn test_inbox_delivery_through_session_pattern() {
    let fabric = BusFabric::new();
    let (pub_id, _pub_rx) = attach(&fabric, 8);
    let (sub_id, mut sub_rx) = attach(&fabric, 8);

    fabric.add_pattern(sub_id, "_INBOX.7F000001.1.>").unwrap();
    fabric.forward(publish(pub_id, "_INBOX.7F000001.1.42"));
    assert_eq!(sub_rx.try_recv().unwrap().subject, "_INBOX.7F000001.1.42");
}

// =============================================================================
// Backpressure
// =============================================================================

#[test]
fn test_full_queue_reports_backpressure() {
    let fabric = BusFabric::new();
    let (pub_id, _pub_rx) = attach(&fabric, 1);
    let (sub_id, mut sub_rx) = attach(&fabric, 1);

    fabric.add_subscription(sub_id, "FOO");
    assert_eq!(fabric.forward(publish(pub_id, "FOO")), FlowControl::Accepted);
    assert_eq!(
        fabric.forward(publish(pub_id, "FOO")),
        FlowControl::Backpressure
    );

    // Draining restores acceptance
    sub_rx.try_recv().unwrap();
    fabric.signal_relief();
    assert_eq!(fabric.forward(publish(pub_id, "FOO")), FlowControl::Accepted);
}

#[test]
fn test_slow_session_does_not_block_others() {
    let fabric = BusFabric::new();
    let (pub_id, _pub_rx) = attach(&fabric, 8);
    let (slow_id, _slow_rx) = attach(&fabric, 1);
    let (fast_id, mut fast_rx) = attach(&fabric, 8);

    fabric.add_subscription(slow_id, "FOO");
    fabric.add_subscription(fast_id, "FOO");

    fabric.forward(publish(pub_id, "FOO"));
    assert_eq!(
        fabric.forward(publish(pub_id, "FOO")),
        FlowControl::Backpressure
    );
    // The fast session still got both copies
    assert!(fast_rx.try_recv().is_ok());
    assert!(fast_rx.try_recv().is_ok());
}

// =============================================================================
// Subscription bookkeeping
// =============================================================================

#[test]
fn test_cross_session_collision() {
    // Both subjects hash to 0x53a63b01
    const COLL_A: &str = "COLL.OVNQX";
    const COLL_B: &str = "COLL.QBORB";
    let hash = subject_hash(COLL_A.as_bytes());
    assert_eq!(hash, subject_hash(COLL_B.as_bytes()));

    let fabric = BusFabric::new();
    let (a, _rx_a) = attach(&fabric, 8);
    let (b, _rx_b) = attach(&fabric, 8);

    assert!(!fabric.add_subscription(a, COLL_A));
    // Second session's subscription makes the hash contended daemon-wide
    assert!(fabric.add_subscription(b, COLL_B));
    assert!(fabric.collision(hash));

    assert!(fabric.del_subscription(b, COLL_B));
    assert!(!fabric.collision(hash));
}

#[test]
fn test_detach_unwinds_collisions() {
    const COLL_A: &str = "COLL.OVNQX";
    const COLL_B: &str = "COLL.QBORB";
    let hash = subject_hash(COLL_A.as_bytes());

    let fabric = BusFabric::new();
    let (a, _rx_a) = attach(&fabric, 8);
    let (b, _rx_b) = attach(&fabric, 8);
    fabric.add_subscription(a, COLL_A);
    fabric.add_subscription(b, COLL_B);
    assert!(fabric.collision(hash));

    fabric.detach(b);
    assert!(!fabric.collision(hash));
    assert_eq!(fabric.conn_count(), 1);
}

#[test]
fn test_detached_session_receives_nothing() {
    let fabric = BusFabric::new();
    let (pub_id, _pub_rx) = attach(&fabric, 8);
    let (sub_id, mut sub_rx) = attach(&fabric, 8);
    fabric.add_subscription(sub_id, "FOO");
    fabric.detach(sub_id);
    fabric.forward(publish(pub_id, "FOO"));
    assert!(sub_rx.try_recv().is_err());
}

#[test]
fn test_sub_events_observable() {
    let fabric = BusFabric::new();
    let mut events = fabric.watch_sub_events();
    let (id, _rx) = attach(&fabric, 8);

    fabric.add_subscription(id, "FOO.BAR");
    fabric.add_pattern(id, "BAZ.>").unwrap();
    fabric.del_subscription(id, "FOO.BAR");

    assert_eq!(
        events.try_recv().unwrap(),
        SubEvent::Listen {
            conn: id,
            subject: "FOO.BAR".to_string(),
            collision: false,
        }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        SubEvent::Listen {
            conn: id,
            subject: "BAZ.>".to_string(),
            collision: false,
        }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        SubEvent::Cancel {
            conn: id,
            subject: "FOO.BAR".to_string(),
            collision: false,
        }
    );
}

#[test]
fn test_sub_events_carry_collision_flag() {
    const COLL_A: &str = "COLL.OVNQX";
    const COLL_B: &str = "COLL.QBORB";

    let fabric = BusFabric::new();
    let mut events = fabric.watch_sub_events();
    let (a, _rx_a) = attach(&fabric, 8);
    let (b, _rx_b) = attach(&fabric, 8);

    fabric.add_subscription(a, COLL_A);
    fabric.add_subscription(b, COLL_B);
    fabric.del_subscription(b, COLL_B);

    let first = events.try_recv().unwrap();
    assert!(matches!(first, SubEvent::Listen { collision: false, .. }));
    // The second subject shares the first's hash
    let second = events.try_recv().unwrap();
    assert!(matches!(second, SubEvent::Listen { collision: true, .. }));
    let third = events.try_recv().unwrap();
    assert!(matches!(third, SubEvent::Cancel { collision: false, .. }));
}

#[test]
fn test_pattern_collision_across_sessions() {
    let fabric = BusFabric::new();
    let (a, _rx_a) = attach(&fabric, 8);
    let (b, _rx_b) = attach(&fabric, 8);

    let hash = subject_hash("FOO.>".as_bytes());
    assert!(!fabric.add_pattern(a, "FOO.>").unwrap());
    // Same pattern from a second session contends its hash daemon-wide
    assert!(fabric.add_pattern(b, "FOO.>").unwrap());
    assert!(fabric.collision(hash));

    assert!(fabric.del_pattern(b, "FOO.>"));
    assert!(!fabric.del_pattern(a, "FOO.>"));
    assert!(!fabric.collision(hash));
}

#[test]
fn test_detach_unwinds_pattern_collisions() {
    let fabric = BusFabric::new();
    let (a, _rx_a) = attach(&fabric, 8);
    let (b, _rx_b) = attach(&fabric, 8);

    let hash = subject_hash("BAR.>".as_bytes());
    fabric.add_pattern(a, "BAR.>").unwrap();
    fabric.add_pattern(b, "BAR.>").unwrap();
    assert!(fabric.collision(hash));

    fabric.detach(b);
    assert!(!fabric.collision(hash));
}
