//! ---
//! cl_section: "03-logging-metrics"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Structured logging helpers for bridge components."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Uniform log fields for the bridge. Every event emitted through the
//! `link_*` macros carries the same `endpoint`, `command`, `correlation_id`
//! and `topic` keys so log queries do not depend on the call site.

pub mod macros;

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Loopback endpoint of the core process.
    pub endpoint: Option<&'a str>,
    /// Wire name of the command involved.
    pub command: Option<&'a str>,
    /// Correlation identifier of the request.
    pub correlation_id: Option<u64>,
    /// Event topic involved.
    pub topic: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the core endpoint.
    pub fn with_endpoint(mut self, endpoint: &'a str) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Attach a command name.
    pub fn with_command(mut self, command: &'a str) -> Self {
        self.command = Some(command);
        self
    }

    /// Attach a correlation identifier.
    pub fn with_correlation_id(mut self, id: u64) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Attach an event topic.
    pub fn with_topic(mut self, topic: &'a str) -> Self {
        self.topic = Some(topic);
        self
    }
}
