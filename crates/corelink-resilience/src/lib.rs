//! ---
//! cl_section: "04-liveness-channel"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Reconnect scheduling strategies."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Reconnect scheduling. Attempts never run out; only the delay is bounded.

pub mod backoff;

pub use backoff::{Backoff, ReconnectPolicy};
