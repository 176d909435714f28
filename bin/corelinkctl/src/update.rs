//! ---
//! cl_section: "07-control-cli"
//! cl_subsection: "binary"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Control CLI driving the bridge against a running core."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use corelink_core::{BridgeHandle, UpdateState};
use corelink_msg::BridgeError;
use serde_json::{json, Value};

/// Top-level update commands.
#[derive(Debug, Subcommand)]
pub enum UpdateCommand {
    /// Ask the core whether a newer release exists.
    Check,
    /// Check, wait for the download to finish, then install.
    Install(InstallOptions),
    /// Relaunch the application through the core.
    Relaunch,
}

#[derive(Debug, Args)]
pub struct InstallOptions {
    /// Seconds to wait for the update package to download.
    #[arg(long, value_name = "SECS", default_value_t = 600)]
    pub wait: u64,
}

pub async fn run(bridge: &BridgeHandle, command: UpdateCommand) -> Result<Value> {
    match command {
        UpdateCommand::Check => {
            let state = bridge.update().check().await?;
            Ok(json!({
                "current": bridge.version().cli_string(),
                "state": state,
            }))
        }
        UpdateCommand::Install(options) => install(bridge, Duration::from_secs(options.wait)).await,
        UpdateCommand::Relaunch => {
            bridge.gateway().relaunch().await?;
            Ok(json!({ "relaunched": true }))
        }
    }
}

async fn install(bridge: &BridgeHandle, wait: Duration) -> Result<Value> {
    let machine = bridge.update();
    if let UpdateState::Idle = machine.check().await? {
        return Ok(json!({ "installed": false, "reason": "no update available" }));
    }

    let mut states = machine.state();
    let ready = tokio::time::timeout(
        wait,
        states.wait_for(|state| {
            if let UpdateState::Downloading { progress } = state {
                eprintln!("downloading: {progress}%");
            }
            matches!(state, UpdateState::ReadyToInstall | UpdateState::Failed { .. })
        }),
    )
    .await
    .map_err(|_| anyhow!("update was not downloaded within {wait:?}"))?
    .map_err(|_| BridgeError::ConnectionLost)?
    .clone();

    if let UpdateState::Failed { reason } = ready {
        return Err(reason.into());
    }
    machine.install().await?;
    Ok(json!({ "installed": true, "state": machine.current() }))
}
