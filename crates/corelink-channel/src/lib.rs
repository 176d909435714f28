//! ---
//! cl_section: "04-liveness-channel"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Connection lifecycle and keepalive for the core process."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
//! Liveness channel to the core process.
//!
//! A single supervisor task owns the connection: it dials, runs the heartbeat,
//! tears the connection down on any failure and dials again with bounded
//! backoff until explicitly shut down. Other components only see connection
//! snapshots, an outbound send slot, and observer callbacks.

pub mod channel;
pub mod connection;
pub mod connector;
pub mod launcher;

pub use channel::{ChannelHandle, ChannelObserver, ChannelSettings, LivenessChannel};
pub use connection::{CloseReason, Connection, ConnectionState};
pub use connector::{Connector, TcpConnector};
pub use launcher::{parse_status_line, CoreLauncher, CoreProcess, LaunchError, STATUS_PREFIX};
