//! ---
//! cl_section: "08-testing"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Scripted responses for the mock core process."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::time::Duration;

use corelink_msg::{BackendFault, EventPayload, Frame};
use serde::Serialize;
use serde_json::Value;

/// One step the mock core performs while handling a request.
#[derive(Debug, Clone)]
pub enum Action {
    /// Push a frame (usually an event) to the client.
    Send(Frame),
    /// Wait before the next step.
    Pause(Duration),
    /// Answer the request successfully.
    Respond(Value),
    /// Answer the request with a failure descriptor.
    Fail(BackendFault),
    /// Close the client connection.
    Disconnect,
}

/// Ordered steps executed for one request. A script without a respond or
/// fail step leaves the request unanswered.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub(crate) actions: Vec<Action>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Immediate success with the given result.
    pub fn ok(result: impl Serialize) -> Self {
        Self::new().respond(result)
    }

    /// Immediate failure.
    pub fn fail(kind: &str, message: &str) -> Self {
        Self::new().failure(kind, message)
    }

    /// Never answer.
    pub fn silent() -> Self {
        Self::new()
    }

    pub fn event<P: EventPayload>(mut self, payload: P) -> Self {
        match Frame::event(&payload) {
            Ok(frame) => self.actions.push(Action::Send(frame)),
            Err(err) => panic!("unserializable scripted event: {err}"),
        }
        self
    }

    pub fn pause(mut self, duration: Duration) -> Self {
        self.actions.push(Action::Pause(duration));
        self
    }

    pub fn respond(mut self, result: impl Serialize) -> Self {
        let value = serde_json::to_value(result).unwrap_or(Value::Null);
        self.actions.push(Action::Respond(value));
        self
    }

    pub fn failure(mut self, kind: &str, message: &str) -> Self {
        self.actions
            .push(Action::Fail(BackendFault::new(kind, message)));
        self
    }

    pub fn disconnect(mut self) -> Self {
        self.actions.push(Action::Disconnect);
        self
    }
}
