//! ---
//! cl_section: "05-command-gateway"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Command dispatch and event fan-out over the liveness channel."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
//! Command dispatch and event fan-out.
//!
//! Both halves observe the liveness channel: the gateway routes responses to
//! the caller that issued the matching request, and the hub republishes
//! events on one typed channel per topic.

pub mod gateway;
pub mod hub;

pub use gateway::{CommandGateway, GatewaySettings};
pub use hub::{ConnectionNotice, EventHub, Subscription, SubscriptionToken};
