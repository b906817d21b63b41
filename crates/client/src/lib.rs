//! rvbus Client - Session layer for talking to an rvbus daemon
//!
//! Two layers:
//! - [`RvClient`] is the sans-I/O session state machine: feed it daemon
//!   bytes, take back queued output and decoded [`ClientEvent`]s. It owns
//!   the handshake sequencing, session synthesis, inbox naming and local
//!   subscription bookkeeping.
//! - [`RvConnection`] wraps the machine around a tokio TCP socket, flushes
//!   queued bytes after every call and keeps the session alive with
//!   keepalive frames.
//!
//! Daemon addresses parse from the legacy string forms via [`DaemonAddr`],
//! including `null` for a daemon-less loopback session.

mod client;
mod connection;
mod connector;
mod error;

pub use client::{ClientEvent, ClientState, RvClient, SessionParams};
pub use connection::RvConnection;
pub use connector::{DaemonAddr, DEFAULT_PORT};
pub use error::{ClientError, Result};

// Test modules - only compiled during testing
#[cfg(test)]
mod client_test;
