//! ---
//! cl_section: "06-state-machines"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Migration state machine tests against the mock core."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use corelink_common::AppConfig;
use corelink_core::{Bridge, BridgeHandle, MigrationState};
use corelink_msg::event::{ChangeRuntimePathProgress, RuntimePathProgress};
use corelink_msg::{BridgeError, CommandName};
use corelink_testharness::{MockCore, Script};
use serde_json::json;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

fn config_for(core: &MockCore) -> AppConfig {
    let mut config = AppConfig::default();
    config.core.endpoint = core.addr();
    config.heartbeat.interval = Duration::from_millis(50);
    config.heartbeat.timeout = Duration::from_millis(300);
    config.reconnect.base_delay = Duration::from_millis(20);
    config.reconnect.max_delay = Duration::from_millis(100);
    config.reconnect.jitter = Duration::ZERO;
    config.commands.default_timeout = WAIT;
    config.update.auto_check = false;
    config.metrics.enabled = false;
    config
}

async fn start(core: &MockCore) -> BridgeHandle {
    let bridge = Bridge::new(config_for(core), None).start().await.unwrap();
    bridge.channel().wait_connected(WAIT).await.unwrap();
    bridge
}

/// Records every state the machine publishes.
fn record(bridge: &BridgeHandle) -> (Arc<Mutex<Vec<MigrationState>>>, JoinHandle<()>) {
    let history = Arc::new(Mutex::new(Vec::new()));
    let mut rx = bridge.migration().state();
    let sink = history.clone();
    let task = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            sink.lock().unwrap().push(state);
        }
    });
    (history, task)
}

fn accept_path(core: &MockCore) {
    core.reply(
        CommandName::ValidateRuntimePath,
        Script::ok(json!({"validity": "valid"})),
    );
}

#[tokio::test]
async fn invalid_path_fails_without_changing() {
    let core = MockCore::start().await.unwrap();
    core.reply(
        CommandName::ValidateRuntimePath,
        Script::ok(json!({"validity": "invalid", "reason": "not a directory"})),
    );
    let bridge = start(&core).await;
    let (history, recorder) = record(&bridge);

    let err = bridge
        .migration()
        .request_change("/bad/path")
        .await
        .unwrap_err();
    assert_eq!(err, BridgeError::InvalidPath("not a directory".into()));
    assert_eq!(
        bridge.migration().current(),
        MigrationState::Failed {
            reason: BridgeError::InvalidPath("not a directory".into())
        }
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(history
        .lock()
        .unwrap()
        .iter()
        .all(|state| !matches!(state, MigrationState::Changing { .. })));
    assert!(core.received_for(CommandName::ChangeRuntimePath).is_empty());

    recorder.abort();
    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn backend_rejection_is_passed_through() {
    let core = MockCore::start().await.unwrap();
    core.reply(
        CommandName::ValidateRuntimePath,
        Script::fail("invalidPath", "path is the current runtime path"),
    );
    let bridge = start(&core).await;

    let err = bridge.migration().request_change("/same").await.unwrap_err();
    assert_eq!(
        err,
        BridgeError::InvalidPath("path is the current runtime path".into())
    );

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn progress_ticks_then_success() {
    let core = MockCore::start().await.unwrap();
    accept_path(&core);
    let tick = Duration::from_millis(40);
    core.reply(
        CommandName::ChangeRuntimePath,
        Script::new()
            .pause(tick)
            .event(RuntimePathProgress {
                current_name: "jre".into(),
                current: 10,
                total: 100,
            })
            .pause(tick)
            .event(RuntimePathProgress {
                current_name: "libraries".into(),
                current: 55,
                total: 100,
            })
            .pause(tick)
            .event(ChangeRuntimePathProgress { percentage: 100.0 })
            .pause(tick)
            .respond(json!({})),
    );
    let bridge = start(&core).await;
    let (history, recorder) = record(&bridge);

    let path = bridge.migration().request_change("/ok/path").await.unwrap();
    assert_eq!(path, PathBuf::from("/ok/path"));
    assert_eq!(
        bridge.migration().current(),
        MigrationState::Succeeded {
            path: "/ok/path".into()
        }
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    let seen: Vec<u8> = history
        .lock()
        .unwrap()
        .iter()
        .filter_map(MigrationState::progress)
        .collect();
    assert_eq!(seen.last(), Some(&100));
    assert!(seen.contains(&55));

    recorder.abort();
    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn second_request_while_running_is_rejected() {
    let core = MockCore::start().await.unwrap();
    accept_path(&core);
    core.reply(
        CommandName::ChangeRuntimePath,
        Script::new()
            .pause(Duration::from_millis(300))
            .respond(json!({})),
    );
    let bridge = start(&core).await;

    let machine = bridge.migration().clone();
    let first = tokio::spawn(async move { machine.request_change("/one").await });

    let mut rx = bridge.migration().state();
    tokio::time::timeout(WAIT, rx.wait_for(|state| state.is_busy()))
        .await
        .unwrap()
        .unwrap();

    let err = bridge.migration().request_change("/two").await.unwrap_err();
    assert_eq!(err, BridgeError::MigrationInProgress);
    assert!(bridge.migration().current().is_busy());

    assert_eq!(first.await.unwrap().unwrap(), PathBuf::from("/one"));
    assert_eq!(core.received_for(CommandName::ChangeRuntimePath).len(), 1);

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn connection_drop_fails_the_change_and_does_not_resume() {
    let core = MockCore::start().await.unwrap();
    accept_path(&core);
    core.reply(
        CommandName::ChangeRuntimePath,
        Script::new().event(ChangeRuntimePathProgress { percentage: 20.0 }),
    );
    let bridge = start(&core).await;

    let machine = bridge.migration().clone();
    let running = tokio::spawn(async move { machine.request_change("/moving").await });

    let mut rx = bridge.migration().state();
    tokio::time::timeout(WAIT, rx.wait_for(|state| state.progress() == Some(20)))
        .await
        .unwrap()
        .unwrap();
    core.drop_connections();

    assert_eq!(
        running.await.unwrap(),
        Err(BridgeError::ConnectionLost)
    );
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
async fn a_new_request_after_failure_starts_over() {
    let core = MockCore::start().await.unwrap();
    core.on(CommandName::ValidateRuntimePath, |payload| {
        if payload["path"] == "/bad" {
            Script::ok(json!({"validity": "invalid"}))
        } else {
            Script::ok(json!({"validity": "potentiallyValid"}))
        }
    });
    core.reply(CommandName::ChangeRuntimePath, Script::ok(json!({})));
    let bridge = start(&core).await;

    let err = bridge.migration().request_change("/bad").await.unwrap_err();
    assert_eq!(err, BridgeError::InvalidPath("/bad".into()));

    bridge.migration().request_change("/good").await.unwrap();
    assert_eq!(
        bridge.migration().current(),
        MigrationState::Succeeded {
            path: "/good".into()
        }
    );

    bridge.migration().reset().unwrap();
    assert_eq!(bridge.migration().current(), MigrationState::Idle);

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn loads_current_and_initial_paths() {
    let core = MockCore::start().await.unwrap();
    core.reply(
        CommandName::GetRuntimePath,
        Script::ok(json!({"path": "/srv/runtime"})),
    );
    core.reply(
        CommandName::GetInitialRuntimePath,
        Script::ok(json!({"path": "/home/user/.launcher/data"})),
    );
    let bridge = start(&core).await;

    let paths = bridge.migration().load_current().await.unwrap();
    assert_eq!(paths.current, PathBuf::from("/srv/runtime"));
    assert_eq!(paths.initial, PathBuf::from("/home/user/.launcher/data"));

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn abandoned_request_still_reaches_a_terminal_state() {
    let core = MockCore::start().await.unwrap();
    core.reply(CommandName::ValidateRuntimePath, Script::silent());
    let mut config = config_for(&core);
    config.commands.default_timeout = Duration::from_millis(300);
    let bridge = Bridge::new(config, None).start().await.unwrap();
    bridge.channel().wait_connected(WAIT).await.unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        bridge.migration().request_change("/slow"),
    )
    .await;
    assert!(abandoned.is_err());

    let mut rx = bridge.migration().state();
    tokio::time::timeout(WAIT, rx.wait_for(MigrationState::is_terminal))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        bridge.migration().current(),
        MigrationState::Failed {
            reason: BridgeError::Timeout { .. }
        }
    ));

    bridge.migration().reset().unwrap();
    assert_eq!(bridge.migration().current(), MigrationState::Idle);

    accept_path(&core);
    core.reply(CommandName::ChangeRuntimePath, Script::ok(json!({})));
    let moved = bridge.migration().request_change("/fast").await.unwrap();
    assert_eq!(moved, PathBuf::from("/fast"));

    bridge.shutdown().await.unwrap();
}
