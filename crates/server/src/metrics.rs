//! Listener metrics
//!
//! One instance is shared across every connection task of a listener.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the daemon listener
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Currently active sessions
    pub sessions_active: AtomicU64,

    /// Total sessions accepted
    pub sessions_total: AtomicU64,

    /// Total envelopes received from sockets
    pub msgs_in: AtomicU64,

    /// Total envelopes written to sockets
    pub msgs_out: AtomicU64,

    /// Total bytes read from sockets
    pub bytes_in: AtomicU64,

    /// Total bytes written to sockets
    pub bytes_out: AtomicU64,

    /// Frames skipped for decode errors
    pub frame_errors: AtomicU64,
}

impl ServerMetrics {
    /// Create a new metrics instance
    pub const fn new() -> Self {
        Self {
            sessions_active: AtomicU64::new(0),
            sessions_total: AtomicU64::new(0),
            msgs_in: AtomicU64::new(0),
            msgs_out: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            frame_errors: AtomicU64::new(0),
        }
    }

    /// Record an accepted session
    #[inline]
    pub fn session_opened(&self) {
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a departed session
    #[inline]
    pub fn session_closed(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record socket bytes read
    #[inline]
    pub fn read(&self, bytes: u64) {
        self.bytes_in.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record socket bytes written
    #[inline]
    pub fn wrote(&self, bytes: u64) {
        self.bytes_out.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get a point-in-time snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_total: self.sessions_total.load(Ordering::Relaxed),
            msgs_in: self.msgs_in.load(Ordering::Relaxed),
            msgs_out: self.msgs_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of listener counters
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub sessions_active: u64,
    pub sessions_total: u64,
    pub msgs_in: u64,
    pub msgs_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub frame_errors: u64,
}
