//! ---
//! cl_section: "02-wire-protocol"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Message schema helpers and protocol codecs."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shared result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failure kinds surfaced to command callers and state machines.
///
/// The type is cloneable so terminal states can carry the reason that ended
/// them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum BridgeError {
    /// The channel dropped before a response arrived.
    #[error("connection to the core process was lost")]
    ConnectionLost,
    /// No response arrived within the deadline.
    #[error("`{command}` received no response within {after:?}")]
    Timeout {
        /// Wire name of the command.
        command: String,
        /// Deadline that elapsed.
        after: Duration,
    },
    /// The core explicitly rejected the request.
    #[error("core rejected the request ({kind}): {message}")]
    Backend {
        /// Backend-defined error kind.
        kind: String,
        /// Human readable detail.
        message: String,
    },
    /// A payload did not match its declared shape.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// A runtime-path change was requested while another is running.
    #[error("a runtime-path migration is already in progress")]
    MigrationInProgress,
    /// The core judged the runtime path unusable.
    #[error("invalid runtime path: {0}")]
    InvalidPath(String),
    /// A state machine was asked to do something its current state forbids.
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        /// Name of the current state.
        state: String,
        /// Operation that was refused.
        action: String,
    },
}

impl BridgeError {
    /// Whether the failure came from the transport rather than the core.
    pub fn is_transport(&self) -> bool {
        matches!(self, BridgeError::ConnectionLost | BridgeError::Timeout { .. })
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

/// Failure descriptor carried by an error response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendFault {
    /// Backend-defined error kind.
    pub kind: String,
    /// Human readable detail.
    #[serde(default)]
    pub message: String,
}

impl BackendFault {
    /// Kind the core uses when a runtime path fails validation.
    pub const INVALID_PATH: &'static str = "invalidPath";

    /// Build a fault descriptor.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<BackendFault> for BridgeError {
    fn from(fault: BackendFault) -> Self {
        if fault.kind == BackendFault::INVALID_PATH {
            BridgeError::InvalidPath(fault.message)
        } else {
            BridgeError::Backend {
                kind: fault.kind,
                message: fault.message,
            }
        }
    }
}
