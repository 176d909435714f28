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
use corelink_core::BridgeHandle;
use serde_json::{json, Value};

pub async fn os(bridge: &BridgeHandle) -> Result<Value> {
    let info = bridge.gateway().get_current_os().await?;
    Ok(serde_json::to_value(info)?)
}

pub async fn open_link(bridge: &BridgeHandle, url: String) -> Result<Value> {
    bridge.gateway().open_external_link(url.as_str()).await?;
    Ok(json!({ "opened": url }))
}

pub async fn open_folder(bridge: &BridgeHandle, path: PathBuf) -> Result<Value> {
    bridge.gateway().open_folder(path.as_path()).await?;
    Ok(json!({ "opened": path }))
}
