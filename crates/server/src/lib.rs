//! rvbus Server - The message bus daemon
//!
//! This crate ties the wire protocol to the routing fabric:
//! - `service` - The per-session state machine (handshake, subscriptions,
//!   delivery), sans-I/O and fully testable without sockets
//! - `advisory` - `_RV.INFO.SYSTEM.*` subject builders
//! - `listen` - The TCP accept loop and per-connection tasks
//! - `metrics` - Listener counters
//!
//! # Design
//!
//! The connection task owns all I/O; `RvService` never touches a socket.
//! That keeps every handshake and routing rule testable by feeding byte
//! slices in and inspecting the output buffer.

pub mod advisory;
mod error;
mod listen;
mod metrics;
mod service;

pub use error::{Result, ServerError};
pub use listen::RvListener;
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use service::{RvService, ServiceConfig, SessionState, SessionStats};
