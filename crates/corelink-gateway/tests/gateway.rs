//! ---
//! cl_section: "05-command-gateway"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Gateway and hub integration tests against the mock core."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::time::Duration;

use corelink_channel::{ChannelHandle, ChannelSettings, LivenessChannel};
use corelink_common::ReleaseChannel;
use corelink_gateway::{CommandGateway, EventHub, GatewaySettings};
use corelink_metrics::{new_registry, BridgeMetrics};
use corelink_msg::command::{GetRuntimePath, PathValidity};
use corelink_msg::event::{ChangeRuntimePathProgress, DownloadProgress};
use corelink_msg::{BridgeError, CommandName};
use corelink_resilience::ReconnectPolicy;
use corelink_testharness::{MockCore, Script};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

fn fast_settings() -> ChannelSettings {
    ChannelSettings {
        connect_timeout: Duration::from_millis(500),
        heartbeat_interval: Duration::from_millis(50),
        heartbeat_timeout: Duration::from_millis(300),
        reconnect: ReconnectPolicy::new(
            Duration::from_millis(20),
            Duration::from_millis(100),
            Duration::ZERO,
        ),
    }
}

struct Rig {
    core: MockCore,
    channel: ChannelHandle,
    gateway: CommandGateway,
    hub: EventHub,
}

async fn rig_with(settings: GatewaySettings, metrics: Option<BridgeMetrics>) -> Rig {
    let core = MockCore::start().await.unwrap();
    let gateway = CommandGateway::new(settings, metrics.clone());
    let hub = EventHub::with_metrics(metrics.clone());
    let channel = LivenessChannel::tcp(fast_settings())
        .observe(gateway.observer())
        .observe(std::sync::Arc::new(hub.clone()))
        .with_metrics(metrics)
        .connect(core.addr());
    gateway.attach(channel.clone());
    channel.wait_connected(WAIT).await.unwrap();
    Rig {
        core,
        channel,
        gateway,
        hub,
    }
}

async fn rig() -> Rig {
    rig_with(GatewaySettings::default(), None).await
}

#[tokio::test]
async fn typed_commands_round_trip() {
    let rig = rig().await;
    rig.core.reply(
        CommandName::GetRuntimePath,
        Script::ok(json!({"path": "/srv/runtime"})),
    );
    rig.core.reply(
        CommandName::ValidateRuntimePath,
        Script::ok(json!({"validity": "potentiallyValid", "reason": "not empty"})),
    );

    let path = rig.gateway.get_runtime_path().await.unwrap();
    assert_eq!(path, std::path::PathBuf::from("/srv/runtime"));

    let report = rig.gateway.validate_runtime_path("/mnt/new").await.unwrap();
    assert_eq!(report.validity, PathValidity::PotentiallyValid);
    assert!(report.validity.is_acceptable());

    let sent = rig.core.received_for(CommandName::ValidateRuntimePath);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload, json!({"path": "/mnt/new"}));

    rig.channel.shutdown().await;
}

#[tokio::test]
async fn out_of_order_responses_reach_their_callers() {
    let rig = rig().await;
    rig.core.on(CommandName::ValidateRuntimePath, |payload| {
        let path = payload["path"].as_str().unwrap_or_default().to_owned();
        let delay = if path == "/slow" { 200 } else { 0 };
        Script::new()
            .pause(Duration::from_millis(delay))
            .respond(json!({"validity": "valid", "reason": path}))
    });

    let (slow, fast) = tokio::join!(
        rig.gateway.validate_runtime_path("/slow"),
        rig.gateway.validate_runtime_path("/fast"),
    );
    assert_eq!(slow.unwrap().reason.as_deref(), Some("/slow"));
    assert_eq!(fast.unwrap().reason.as_deref(), Some("/fast"));
    assert_eq!(rig.gateway.in_flight(), 0);

    rig.channel.shutdown().await;
}

#[tokio::test]
async fn backend_failures_are_typed() {
    let rig = rig().await;
    rig.core.reply(
        CommandName::OpenFolder,
        Script::fail("notFound", "no such folder"),
    );
    rig.core.reply(
        CommandName::ChangeRuntimePath,
        Script::fail("invalidPath", "read-only volume"),
    );

    let err = rig.gateway.open_folder("/missing").await.unwrap_err();
    assert_eq!(
        err,
        BridgeError::Backend {
            kind: "notFound".into(),
            message: "no such folder".into(),
        }
    );

    let err = rig
        .gateway
        .change_runtime_path("/ro", None)
        .await
        .unwrap_err();
    assert_eq!(err, BridgeError::InvalidPath("read-only volume".into()));

    rig.channel.shutdown().await;
}

#[tokio::test]
async fn unanswered_commands_time_out_and_late_replies_are_ignored() {
    let rig = rig_with(
        GatewaySettings {
            default_timeout: Duration::from_millis(100),
        },
        None,
    )
    .await;
    rig.core.reply(
        CommandName::GetRuntimePath,
        Script::new()
            .pause(Duration::from_millis(300))
            .respond(json!({"path": "/late"})),
    );

    let err = rig.gateway.get_runtime_path().await.unwrap_err();
    assert!(matches!(err, BridgeError::Timeout { ref command, .. } if command == "getRuntimePath"));
    assert_eq!(rig.gateway.in_flight(), 0);

    // The late reply arrives on a live connection and must not disturb later calls.
    tokio::time::sleep(Duration::from_millis(300)).await;
    rig.core.reply(
        CommandName::GetRuntimePath,
        Script::ok(json!({"path": "/fresh"})),
    );
    let path = rig
        .gateway
        .call_within(&GetRuntimePath {}, Some(WAIT))
        .await
        .unwrap()
        .path;
    assert_eq!(path, std::path::PathBuf::from("/fresh"));

    rig.channel.shutdown().await;
}

#[tokio::test]
async fn connection_drop_fails_every_pending_command() {
    let rig = rig().await;
    rig.core.reply(CommandName::GetRuntimePath, Script::silent());
    rig.core.reply(CommandName::ChangeRuntimePath, Script::silent());

    let gateway = rig.gateway.clone();
    let plain = tokio::spawn(async move { gateway.get_runtime_path().await });
    let gateway = rig.gateway.clone();
    let unbounded = tokio::spawn(async move { gateway.change_runtime_path("/next", None).await });

    tokio::time::timeout(WAIT, async {
        while rig.core.received().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    rig.core.drop_connections();

    assert_eq!(plain.await.unwrap(), Err(BridgeError::ConnectionLost));
    assert_eq!(unbounded.await.unwrap(), Err(BridgeError::ConnectionLost));
    assert_eq!(rig.gateway.in_flight(), 0);

    rig.channel.shutdown().await;
}

#[tokio::test]
async fn relaunch_counts_a_drop_as_success() {
    let rig = rig().await;
    rig.core
        .reply(CommandName::Relaunch, Script::new().disconnect());
    rig.gateway.relaunch().await.unwrap();
    rig.channel.shutdown().await;
}

#[tokio::test]
async fn commands_fail_fast_while_disconnected() {
    let core = MockCore::start().await.unwrap();
    let addr = core.addr();
    core.shutdown().await;

    let gateway = CommandGateway::new(GatewaySettings::default(), None);
    let channel = LivenessChannel::tcp(fast_settings())
        .observe(gateway.observer())
        .connect(addr);
    gateway.attach(channel.clone());

    let started = std::time::Instant::now();
    let err = gateway
        .check_for_update(ReleaseChannel::Stable)
        .await
        .unwrap_err();
    assert_eq!(err, BridgeError::ConnectionLost);
    assert!(started.elapsed() < Duration::from_secs(1));

    channel.shutdown().await;
}

#[tokio::test]
async fn events_emitted_before_a_response_are_visible_when_it_resolves() {
    let rig = rig().await;
    rig.core.reply(
        CommandName::ChangeRuntimePath,
        Script::new()
            .event(ChangeRuntimePathProgress { percentage: 10.0 })
            .event(ChangeRuntimePathProgress { percentage: 100.0 })
            .respond(json!({})),
    );
    let progress = rig.hub.subscribe::<ChangeRuntimePathProgress>();

    rig.gateway
        .change_runtime_path("/next", Some(WAIT))
        .await
        .unwrap();
    assert_eq!(progress.latest().unwrap().percent(), 100);

    rig.channel.shutdown().await;
}

#[tokio::test]
async fn pushed_events_reach_subscribers_and_metrics() {
    let metrics = BridgeMetrics::new(new_registry()).unwrap();
    let rig = rig_with(GatewaySettings::default(), Some(metrics.clone())).await;
    rig.core.reply(
        CommandName::GetCurrentOs,
        Script::ok(json!({"platform": "linux", "arch": "x64"})),
    );
    let mut downloads = rig.hub.subscribe::<DownloadProgress>();

    rig.core.publish(DownloadProgress { percent: 42.4 }).unwrap();
    let seen = tokio::time::timeout(WAIT, downloads.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.percent(), 42);

    let os = rig.gateway.get_current_os().await.unwrap();
    assert_eq!(os.platform, "linux");

    let families = metrics.registry().gather();
    let names: Vec<&str> = families.iter().map(|family| family.get_name()).collect();
    assert!(names.contains(&"corelink_commands_total"));
    assert!(names.contains(&"corelink_events_total"));

    rig.channel.shutdown().await;
}
