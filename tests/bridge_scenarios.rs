//! ---
//! cl_section: "08-testing"
//! cl_subsection: "integration-tests"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "End-to-end bridge scenarios against the mock core."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use corelink_common::AppConfig;
use corelink_core::{Bridge, BridgeHandle, MigrationState, UpdateState};
use corelink_msg::event::{RuntimePathProgress, UpdateAvailable};
use corelink_msg::{BridgeError, CommandName};
use corelink_testharness::{MockCore, Script};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

/// Write a config file pointing at `core` and load it the way the CLI does.
fn config_file_for(core: &MockCore) -> Result<AppConfig> {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
    write!(
        file,
        r#"
[core]
endpoint = "{addr}"
connect_timeout = 500

[heartbeat]
interval = 50
timeout = 300

[reconnect]
base_delay = 20
max_delay = 100
jitter = 0

[commands]
default_timeout = 5000

[update]
channel = "stable"
auto_check = false

[metrics]
enabled = true
"#,
        addr = core.addr()
    )?;
    let loaded = AppConfig::load_with_source(&[file.path()])?;
    assert_eq!(loaded.source.as_deref(), Some(file.path()));
    Ok(loaded.config)
}

async fn start(core: &MockCore) -> BridgeHandle {
    let config = config_file_for(core).unwrap();
    let bridge = Bridge::new(config, None).start().await.unwrap();
    bridge.channel().wait_connected(WAIT).await.unwrap();
    bridge
}

fn progress_tick(current: u64) -> RuntimePathProgress {
    RuntimePathProgress {
        current_name: format!("step-{current}"),
        current,
        total: 100,
    }
}

#[tokio::test]
async fn bad_path_fails_and_never_changes() {
    let core = MockCore::start().await.unwrap();
    core.reply(
        CommandName::ValidateRuntimePath,
        Script::fail("invalidPath", "/bad/path is not a directory"),
    );
    let bridge = start(&core).await;

    let entered_changing = Arc::new(Mutex::new(false));
    let flag = entered_changing.clone();
    let mut rx = bridge.migration().state();
    let watcher = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            if matches!(*rx.borrow_and_update(), MigrationState::Changing { .. }) {
                *flag.lock().unwrap() = true;
            }
        }
    });

    let result = bridge.migration().request_change("/bad/path").await;
    assert_eq!(
        result,
        Err(BridgeError::InvalidPath("/bad/path is not a directory".into()))
    );
    assert!(matches!(
        bridge.migration().current(),
        MigrationState::Failed {
            reason: BridgeError::InvalidPath(_)
        }
    ));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!*entered_changing.lock().unwrap());

    watcher.abort();
    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn three_progress_ticks_then_success() {
    let core = MockCore::start().await.unwrap();
    core.reply(
        CommandName::ValidateRuntimePath,
        Script::ok(json!({"validity": "valid"})),
    );
    let gap = Duration::from_millis(40);
    core.reply(
        CommandName::ChangeRuntimePath,
        Script::new()
            .pause(gap)
            .event(progress_tick(10))
            .pause(gap)
            .event(progress_tick(55))
            .pause(gap)
            .event(progress_tick(100))
            .pause(gap)
            .respond(json!({})),
    );
    let bridge = start(&core).await;

    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    let mut rx = bridge.migration().state();
    let watcher = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            if let Some(progress) = rx.borrow_and_update().progress() {
                sink.lock().unwrap().push(progress);
            }
        }
    });

    bridge.migration().request_change("/ok/path").await.unwrap();
    assert_eq!(
        bridge.migration().current(),
        MigrationState::Succeeded {
            path: "/ok/path".into()
        }
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    let observed = observed.lock().unwrap().clone();
    assert_eq!(observed.last(), Some(&100));
    assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));

    watcher.abort();
    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn drop_mid_change_fails_without_resuming() {
    let core = MockCore::start().await.unwrap();
    core.reply(
        CommandName::ValidateRuntimePath,
        Script::ok(json!({"validity": "valid"})),
    );
    core.reply(
        CommandName::ChangeRuntimePath,
        Script::new()
            .event(progress_tick(30))
            .pause(Duration::from_millis(50))
            .disconnect(),
    );
    let bridge = start(&core).await;

    let result = bridge.migration().request_change("/ok/path").await;
    assert_eq!(result, Err(BridgeError::ConnectionLost));

    core.wait_for_accepted(2, WAIT).await.unwrap();
    bridge.channel().wait_connected(WAIT).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        bridge.migration().current(),
        MigrationState::Failed {
            reason: BridgeError::ConnectionLost
        }
    );
    assert_eq!(core.received_for(CommandName::ChangeRuntimePath).len(), 1);

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn concurrent_change_is_rejected_once_in_flight() {
    let core = MockCore::start().await.unwrap();
    core.reply(
        CommandName::ValidateRuntimePath,
        Script::new()
            .pause(Duration::from_millis(150))
            .respond(json!({"validity": "valid"})),
    );
    core.reply(CommandName::ChangeRuntimePath, Script::ok(json!({})));
    let bridge = start(&core).await;

    let machine = bridge.migration().clone();
    let first = tokio::spawn(async move { machine.request_change("/first").await });
    let mut rx = bridge.migration().state();
    tokio::time::timeout(WAIT, rx.wait_for(MigrationState::is_busy))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        bridge.migration().request_change("/second").await,
        Err(BridgeError::MigrationInProgress)
    );
    first.await.unwrap().unwrap();
    assert_eq!(core.received_for(CommandName::ValidateRuntimePath).len(), 1);

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn no_update_then_later_notice() {
    let core = MockCore::start().await.unwrap();
    core.reply(
        CommandName::CheckForUpdate,
        Script::ok(json!({"updateAvailable": false})),
    );
    let bridge = start(&core).await;

    assert_eq!(bridge.update().check().await.unwrap(), UpdateState::Idle);

    core.publish(UpdateAvailable { version: None }).unwrap();
    let mut rx = bridge.update().state();
    let state = tokio::time::timeout(
        WAIT,
        rx.wait_for(|state| matches!(state, UpdateState::Available { .. })),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(
        state,
        UpdateState::Available {
            version: "unknown".into()
        }
    );

    let registry = bridge.metrics().expect("metrics enabled in config");
    let names: Vec<String> = registry
        .gather()
        .into_iter()
        .map(|family| family.get_name().to_owned())
        .collect();
    assert!(names.contains(&"corelink_events_total".to_owned()));

    bridge.shutdown().await.unwrap();
}
