//! In-process routing fabric
//!
//! The fabric connects every session inside one daemon: a publish forwarded
//! by one session fans out to every other session whose exact or wildcard
//! subscriptions match. Delivery is per-session bounded-queue; a full queue
//! reports [`FlowControl::Backpressure`] so the source pauses its socket
//! reads until a consumer drains and relief is signaled.
//!
//! The fabric also keeps the daemon-wide [`CollisionDb`], since hash
//! contention is only visible across sessions.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};

use rvbus_protocol::{is_restricted_subject, subject_hash, FieldType, PatternMatcher, Result};

use crate::CollisionDb;

/// Fabric-assigned session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Forward outcome reported to the publishing session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    /// Every matching session accepted the message
    Accepted,
    /// At least one matching session's queue was full; pause reads
    Backpressure,
}

/// One message crossing the fabric
#[derive(Debug, Clone)]
pub struct Publish {
    /// Concrete subject
    pub subject: String,
    /// Reply subject, if the publisher wants answers
    pub reply: Option<String>,
    /// Wire type of the payload
    pub ftype: FieldType,
    /// Payload bytes, shared not copied
    pub payload: Bytes,
    /// Session the message entered through
    pub source: ConnId,
}

/// Subscription-interest change, observable by an embedding bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubEvent {
    /// A session started listening on a subject or pattern
    Listen {
        conn: ConnId,
        subject: String,
        /// Daemon-wide hash contention at the time of the change
        collision: bool,
    },
    /// A session stopped listening
    Cancel {
        conn: ConnId,
        subject: String,
        /// Daemon-wide hash contention after the change
        collision: bool,
    },
}

/// The routing surface a session drives
///
/// Synchronous and object-safe: sessions hold `Arc<dyn Fabric>` and call it
/// from both async connection tasks and tests.
pub trait Fabric: Send + Sync {
    /// Register a session and its delivery queue
    fn attach(&self, tx: mpsc::Sender<Publish>) -> ConnId;

    /// Remove a session and unwind its subscriptions
    fn detach(&self, conn: ConnId);

    /// Fan a publish out to every other matching session
    fn forward(&self, msg: Publish) -> FlowControl;

    /// Record an exact subscription; returns the daemon-wide collision state
    fn add_subscription(&self, conn: ConnId, subject: &str) -> bool;

    /// Drop an exact subscription; returns whether the hash stays contended
    fn del_subscription(&self, conn: ConnId, subject: &str) -> bool;

    /// Record a wildcard subscription; returns the daemon-wide collision
    /// state of the pattern's hash
    fn add_pattern(&self, conn: ConnId, pattern: &str) -> Result<bool>;

    /// Drop a wildcard subscription; returns whether the hash stays contended
    fn del_pattern(&self, conn: ConnId, pattern: &str) -> bool;

    /// Daemon-wide collision state for a subject hash
    fn collision(&self, hash: u32) -> bool;

    /// Handle a backpressured session awaits relief on
    fn relief(&self) -> Arc<Notify>;

    /// Signal that queue capacity was freed
    fn signal_relief(&self);
}

#[derive(Debug)]
struct ConnState {
    tx: mpsc::Sender<Publish>,
    exact: HashSet<String>,
    patterns: Vec<PatternMatcher>,
}

#[derive(Debug, Default)]
struct Inner {
    conns: HashMap<ConnId, ConnState>,
    collisions: CollisionDb,
}

/// The daemon's single shared fabric
#[derive(Debug)]
pub struct BusFabric {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    relief: Arc<Notify>,
    sub_events: Mutex<Option<mpsc::UnboundedSender<SubEvent>>>,
}

impl Default for BusFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl BusFabric {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
            relief: Arc::new(Notify::new()),
            sub_events: Mutex::new(None),
        }
    }

    /// Stream subscription-interest changes to an embedding bridge
    ///
    /// A daemon that itself connects upstream mirrors local interest there.
    pub fn watch_sub_events(&self) -> mpsc::UnboundedReceiver<SubEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sub_events.lock() = Some(tx);
        rx
    }

    fn emit(&self, event: SubEvent) {
        let mut guard = self.sub_events.lock();
        if let Some(tx) = guard.as_ref() {
            if tx.send(event).is_err() {
                *guard = None;
            }
        }
    }

    /// Number of attached sessions
    pub fn conn_count(&self) -> usize {
        self.inner.lock().conns.len()
    }

    fn matches(state: &ConnState, subject: &str) -> bool {
        if state.exact.contains(subject) {
            return true;
        }
        let restricted = is_restricted_subject(subject);
        state.patterns.iter().any(|p| {
            if restricted && p.is_broad() {
                return false;
            }
            p.matches(subject)
        })
    }
}

impl Fabric for BusFabric {
    fn attach(&self, tx: mpsc::Sender<Publish>) -> ConnId {
        let id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.lock().conns.insert(
            id,
            ConnState {
                tx,
                exact: HashSet::new(),
                patterns: Vec::new(),
            },
        );
        debug!(conn = %id, "session attached to fabric");
        id
    }

    fn detach(&self, conn: ConnId) {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.conns.remove(&conn) {
            for subject in &state.exact {
                inner.collisions.remove(subject_hash(subject.as_bytes()));
            }
            for pattern in &state.patterns {
                inner.collisions.remove(subject_hash(pattern.pattern().as_bytes()));
            }
            debug!(
                conn = %conn,
                exact = state.exact.len(),
                patterns = state.patterns.len(),
                "session detached from fabric"
            );
        }
        // Departing sessions free queue space for everyone blocked on them
        self.relief.notify_waiters();
    }

    fn forward(&self, msg: Publish) -> FlowControl {
        let inner = self.inner.lock();
        let mut flow = FlowControl::Accepted;
        let mut delivered = 0usize;

        for (&id, state) in &inner.conns {
            if id == msg.source || !Self::matches(state, &msg.subject) {
                continue;
            }
            match state.tx.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(conn = %id, subject = %msg.subject, "delivery queue full, backpressure");
                    flow = FlowControl::Backpressure;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        trace!(
            subject = %msg.subject,
            source = %msg.source,
            delivered,
            "forwarded publish"
        );
        flow
    }

    fn add_subscription(&self, conn: ConnId, subject: &str) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let hash = subject_hash(subject.as_bytes());
        if let Some(state) = inner.conns.get_mut(&conn) {
            if state.exact.insert(subject.to_string()) {
                inner.collisions.insert(hash);
            }
        }
        let collision = inner.collisions.check(hash);
        drop(guard);
        self.emit(SubEvent::Listen {
            conn,
            subject: subject.to_string(),
            collision,
        });
        collision
    }

    fn del_subscription(&self, conn: ConnId, subject: &str) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let hash = subject_hash(subject.as_bytes());
        if let Some(state) = inner.conns.get_mut(&conn) {
            if state.exact.remove(subject) {
                inner.collisions.remove(hash);
            }
        }
        let collision = inner.collisions.check(hash);
        drop(guard);
        self.emit(SubEvent::Cancel {
            conn,
            subject: subject.to_string(),
            collision,
        });
        collision
    }

    fn add_pattern(&self, conn: ConnId, pattern: &str) -> Result<bool> {
        let matcher = PatternMatcher::compile(pattern)?;
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let hash = subject_hash(pattern.as_bytes());
        if let Some(state) = inner.conns.get_mut(&conn) {
            if !state.patterns.iter().any(|p| p.pattern() == pattern) {
                state.patterns.push(matcher);
                inner.collisions.insert(hash);
            }
        }
        let collision = inner.collisions.check(hash);
        drop(guard);
        self.emit(SubEvent::Listen {
            conn,
            subject: pattern.to_string(),
            collision,
        });
        Ok(collision)
    }

    fn del_pattern(&self, conn: ConnId, pattern: &str) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let hash = subject_hash(pattern.as_bytes());
        if let Some(state) = inner.conns.get_mut(&conn) {
            let before = state.patterns.len();
            state.patterns.retain(|p| p.pattern() != pattern);
            if state.patterns.len() < before {
                inner.collisions.remove(hash);
            }
        }
        let collision = inner.collisions.check(hash);
        drop(guard);
        self.emit(SubEvent::Cancel {
            conn,
            subject: pattern.to_string(),
            collision,
        });
        collision
    }

    fn collision(&self, hash: u32) -> bool {
        self.inner.lock().collisions.check(hash)
    }

    fn relief(&self) -> Arc<Notify> {
        Arc::clone(&self.relief)
    }

    fn signal_relief(&self) {
        self.relief.notify_waiters();
    }
}
