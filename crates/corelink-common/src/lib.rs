//! ---
//! cl_section: "01-shared-runtime"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Shared primitives for the control-plane bridge."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
//! Shared primitives for the corelink workspace.
//! This crate exposes configuration loading, tracing initialisation, and
//! version metadata consumed by every other crate.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{
    AppConfig, CommandConfig, CoreConfig, HeartbeatConfig, LoadedAppConfig, LoggingConfig,
    MetricsConfig, MigrationConfig, ReconnectConfig, ReleaseChannel, UpdateConfig,
};
pub use logging::{init_tracing, LogFormat, LogGuard};
pub use version::VersionInfo;
