//! ---
//! cl_section: "02-wire-protocol"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Message schema helpers and protocol codecs."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Boundary contract between the UI process and the core process.
//!
//! Frames are newline-delimited JSON objects discriminated by `type`. Requests
//! and responses are matched by a numeric correlation id, events are keyed by
//! topic, and ping/pong frames carry the liveness probe.

pub mod codec;
pub mod command;
pub mod error;
pub mod event;
pub mod frame;

pub use codec::{CodecError, FrameReader, FrameWriter};
pub use command::{Ack, CommandName, Deadline, Request};
pub use error::{BackendFault, BridgeError, Result};
pub use event::{Delivery, EventPayload, Topic};
pub use frame::Frame;
