//! Advisory subject builders
//!
//! The daemon narrates the bus over `_RV.INFO.SYSTEM.*` subjects: session
//! lifecycle, listen interest and a periodic host heartbeat. Advisories are
//! plain publishes; only sessions that subscribed under `_RV.` hear them,
//! and broad `>` subscriptions never do.

/// Subject announcing a new session
pub fn session_start(session: &str) -> String {
    format!("_RV.INFO.SYSTEM.SESSION.START.{session}")
}

/// Subject announcing a departed session
pub fn session_stop(session: &str) -> String {
    format!("_RV.INFO.SYSTEM.SESSION.STOP.{session}")
}

/// Subject announcing new listen interest
pub fn listen_start(subject: &str) -> String {
    format!("_RV.INFO.SYSTEM.LISTEN.START.{subject}")
}

/// Subject announcing dropped listen interest
pub fn listen_stop(subject: &str) -> String {
    format!("_RV.INFO.SYSTEM.LISTEN.STOP.{subject}")
}

/// Subject of the periodic host heartbeat
pub fn host_status(ipaddr: u32) -> String {
    format!("_RV.INFO.SYSTEM.HOST.STATUS.{ipaddr:08X}")
}

/// True when listen interest in `subject` should be advertised
///
/// Inbox and administrative interest is private to the session.
pub fn should_advertise(subject: &str) -> bool {
    !rvbus_protocol::is_restricted_subject(subject)
}
