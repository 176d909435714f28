//! ---
//! cl_section: "07-control-cli"
//! cl_subsection: "binary"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Control CLI driving the bridge against a running core."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use corelink_core::{BridgeHandle, MigrationState};
use serde_json::{json, Value};

/// Runtime directory commands.
#[derive(Debug, Subcommand)]
pub enum RuntimePathCommand {
    /// Print the current runtime directory.
    Get,
    /// Print the default runtime directory for a fresh install.
    Initial,
    /// Ask the core whether a directory can become the runtime directory.
    Validate { path: PathBuf },
    /// Validate and switch to a new runtime directory.
    Change { path: PathBuf },
}

pub async fn run(bridge: &BridgeHandle, command: RuntimePathCommand) -> Result<Value> {
    match command {
        RuntimePathCommand::Get => {
            let path = bridge.gateway().get_runtime_path().await?;
            Ok(json!({ "path": path }))
        }
        RuntimePathCommand::Initial => {
            let path = bridge.gateway().get_initial_runtime_path().await?;
            Ok(json!({ "path": path }))
        }
        RuntimePathCommand::Validate { path } => {
            let report = bridge.gateway().validate_runtime_path(path.as_path()).await?;
            Ok(json!({
                "path": path,
                "validity": report.validity,
                "acceptable": report.validity.is_acceptable(),
                "reason": report.reason,
            }))
        }
        RuntimePathCommand::Change { path } => change(bridge, path).await,
    }
}

async fn change(bridge: &BridgeHandle, path: PathBuf) -> Result<Value> {
    let mut states = bridge.migration().state();
    let progress = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            if let MigrationState::Changing { progress, .. } = state {
                eprintln!("migrating: {progress}%");
            }
        }
    });

    let outcome = bridge.migration().request_change(path).await;
    progress.abort();
    outcome?;
    Ok(serde_json::to_value(bridge.migration().current())?)
}
