//! ---
//! cl_section: "02-wire-protocol"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Message schema helpers and protocol codecs."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::{CommandName, Request};
use crate::error::{BackendFault, BridgeError};
use crate::event::{EventPayload, Topic};

/// One line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Command sent to the core.
    Request {
        /// Correlation id, unique per connection.
        id: u64,
        /// Command being invoked.
        command: CommandName,
        /// Command-specific arguments.
        #[serde(default)]
        payload: Value,
    },
    /// Reply matching a request id. Exactly one of `result` and `error` is set.
    Response {
        /// Correlation id of the request.
        id: u64,
        /// Success payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Failure descriptor.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<BackendFault>,
    },
    /// Unsolicited push from the core.
    Event {
        /// Subject of the event.
        topic: Topic,
        /// Topic-specific payload.
        #[serde(default)]
        payload: Value,
    },
    /// Liveness probe.
    Ping {
        /// Probe sequence number.
        seq: u64,
    },
    /// Probe acknowledgement echoing the ping's sequence number.
    Pong {
        /// Sequence number being acknowledged.
        seq: u64,
    },
}

impl Frame {
    /// Build a request frame from a typed command.
    pub fn request<R: Request>(id: u64, request: &R) -> Result<Self, BridgeError> {
        Ok(Frame::Request {
            id,
            command: R::NAME,
            payload: serde_json::to_value(request)?,
        })
    }

    /// Successful response frame.
    pub fn ok(id: u64, result: impl Serialize) -> Result<Self, BridgeError> {
        Ok(Frame::Response {
            id,
            result: Some(serde_json::to_value(result)?),
            error: None,
        })
    }

    /// Failed response frame.
    pub fn failure(id: u64, fault: BackendFault) -> Self {
        Frame::Response {
            id,
            result: None,
            error: Some(fault),
        }
    }

    /// Event frame from a typed payload.
    pub fn event<P: EventPayload>(payload: &P) -> Result<Self, BridgeError> {
        Ok(Frame::Event {
            topic: P::TOPIC,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Request { .. } => "request",
            Frame::Response { .. } => "response",
            Frame::Event { .. } => "event",
            Frame::Ping { .. } => "ping",
            Frame::Pong { .. } => "pong",
        }
    }
}
