//! ---
//! cl_section: "06-state-machines"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Migration and update state machines riding on the gateway."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
//! State machines and the bridge facade.
//!
//! Each machine owns its state in a `watch` channel and only changes it
//! through a pure reducer; the rendering layer gets read-only receivers.

pub mod bridge;
pub mod migration;
pub mod update;

pub use bridge::{Bridge, BridgeHandle};
pub use migration::{MigrationInput, MigrationMachine, MigrationSettings, MigrationState, RuntimePaths};
pub use update::{UpdateInput, UpdateMachine, UpdateSettings, UpdateState, UNKNOWN_VERSION};
