//! ---
//! cl_section: "04-liveness-channel"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Connection lifecycle and keepalive for the core process."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Observable view of the transport. A new value replaces the previous one
/// on every reconnect, so `last_heartbeat` never carries over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub endpoint: SocketAddr,
    pub state: ConnectionState,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Connection {
    pub fn new(endpoint: SocketAddr, state: ConnectionState) -> Self {
        Self {
            endpoint,
            state,
            last_heartbeat: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The core closed the stream.
    RemoteClosed,
    /// A liveness probe went unanswered for the timeout window.
    HeartbeatTimeout,
    /// Reading or writing failed.
    Io(String),
    /// Application teardown. The channel will not reconnect.
    Shutdown,
}

impl CloseReason {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, CloseReason::Shutdown)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::RemoteClosed => f.write_str("remote closed"),
            CloseReason::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            CloseReason::Io(err) => write!(f, "io error: {err}"),
            CloseReason::Shutdown => f.write_str("shutdown"),
        }
    }
}
