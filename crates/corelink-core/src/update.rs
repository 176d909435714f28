//! ---
//! cl_section: "06-state-machines"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Application update lifecycle state machine."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use corelink_common::{AppConfig, ReleaseChannel, VersionInfo};
use corelink_gateway::{CommandGateway, ConnectionNotice, EventHub, Subscription};
use corelink_logging::{link_info, link_warn, LogContext};
use corelink_msg::command::UpdateCheck;
use corelink_msg::event::{DownloadProgress, UpdateAvailable, UpdateDownloaded, UpdateNotAvailable};
use corelink_msg::{BridgeError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Version reported when neither the notice nor the last check named one.
pub const UNKNOWN_VERSION: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum UpdateState {
    Idle,
    Checking,
    Available { version: String },
    Downloading { progress: u8 },
    ReadyToInstall,
    Installing,
    Failed { reason: BridgeError },
}

impl UpdateState {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateState::Idle => "idle",
            UpdateState::Checking => "checking",
            UpdateState::Available { .. } => "available",
            UpdateState::Downloading { .. } => "downloading",
            UpdateState::ReadyToInstall => "readyToInstall",
            UpdateState::Installing => "installing",
            UpdateState::Failed { .. } => "failed",
        }
    }

    /// States from which a new check may start.
    pub fn accepts_check(&self) -> bool {
        matches!(self, UpdateState::Idle | UpdateState::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateInput {
    CheckStarted,
    /// The check command answered. `None` means nothing newer exists.
    CheckFinished { available: Option<String> },
    /// `updateAvailable` notice.
    Announced { version: String },
    /// `updateNotAvailable` notice.
    NotAvailable,
    DownloadProgress { percent: u8 },
    Downloaded,
    InstallStarted,
    Relaunched,
    ConnectionLost,
    Fail(BridgeError),
}

/// Pure transition function. `None` means the input does not apply.
pub fn apply(state: &UpdateState, input: UpdateInput) -> Option<UpdateState> {
    use UpdateState::*;

    match (state, input) {
        (Idle | Failed { .. }, UpdateInput::CheckStarted) => Some(Checking),
        (Checking, UpdateInput::CheckFinished { available }) => Some(match available {
            Some(version) => Available { version },
            None => Idle,
        }),
        (Idle | Checking | Failed { .. }, UpdateInput::Announced { version }) => {
            Some(Available { version })
        }
        (Available { version: current }, UpdateInput::Announced { version })
            if *current != version =>
        {
            Some(Available { version })
        }
        (Checking, UpdateInput::NotAvailable) => Some(Idle),
        (Available { .. }, UpdateInput::DownloadProgress { percent }) => {
            Some(Downloading { progress: percent })
        }
        (Downloading { progress }, UpdateInput::DownloadProgress { percent })
            if *progress != percent =>
        {
            Some(Downloading { progress: percent })
        }
        (Checking | Available { .. } | Downloading { .. }, UpdateInput::Downloaded) => {
            Some(ReadyToInstall)
        }
        (ReadyToInstall, UpdateInput::InstallStarted) => Some(Installing),
        (ReadyToInstall | Installing, UpdateInput::Relaunched) => Some(Idle),
        (Checking | Downloading { .. }, UpdateInput::ConnectionLost) => Some(Failed {
            reason: BridgeError::ConnectionLost,
        }),
        (Idle | Failed { .. }, UpdateInput::Fail(_)) => None,
        (_, UpdateInput::Fail(reason)) => Some(Failed { reason }),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct UpdateSettings {
    pub channel: ReleaseChannel,
    /// Interval of the background re-check.
    pub poll_interval: Duration,
}

impl From<&AppConfig> for UpdateSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            channel: config.update.channel,
            poll_interval: config.update.poll_interval,
        }
    }
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

struct Shared {
    state: watch::Sender<UpdateState>,
    /// Version named by the most recent check or notice.
    last_version: Mutex<Option<String>>,
}

impl Shared {
    fn transition(&self, input: UpdateInput) -> bool {
        self.state.send_if_modified(|state| match apply(state, input) {
            Some(next) => {
                debug!(from = state.name(), to = next.name(), "update transition");
                *state = next;
                true
            }
            None => false,
        })
    }

    fn remember(&self, version: Option<&str>) {
        if let Some(version) = version {
            *self.last_version.lock() = Some(version.to_owned());
        }
    }

    fn announced_version(&self, version: Option<String>) -> String {
        version
            .or_else(|| self.last_version.lock().clone())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_owned())
    }
}

/// Drives checking for, fetching and applying an application update.
#[derive(Clone)]
pub struct UpdateMachine {
    gateway: CommandGateway,
    settings: UpdateSettings,
    version: VersionInfo,
    shared: Arc<Shared>,
    listener: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl UpdateMachine {
    /// Create the machine and start following update notices on `hub`.
    /// Must be called inside a Tokio runtime.
    pub fn new(
        gateway: CommandGateway,
        hub: &EventHub,
        settings: UpdateSettings,
        version: VersionInfo,
    ) -> Self {
        let (state, _) = watch::channel(UpdateState::Idle);
        let shared = Arc::new(Shared {
            state,
            last_version: Mutex::new(None),
        });
        let listener = tokio::spawn(Notices::subscribe(hub).follow(shared.clone()));
        Self {
            gateway,
            settings,
            version,
            shared,
            listener: Arc::new(Mutex::new(Some(listener))),
        }
    }

    /// Read-only view of the state.
    pub fn state(&self) -> watch::Receiver<UpdateState> {
        self.shared.state.subscribe()
    }

    pub fn current(&self) -> UpdateState {
        self.shared.state.borrow().clone()
    }

    /// Ask the core whether a newer release exists.
    ///
    /// A no-op returning the current state while a check or an update is
    /// already under way. Dropping the returned future does not abandon the
    /// check: it finishes on its own task.
    pub async fn check(&self) -> Result<UpdateState> {
        if !self.shared.transition(UpdateInput::CheckStarted) {
            return Ok(self.current());
        }
        let machine = self.clone();
        let outcome = tokio::spawn(async move { machine.run_check().await }).await;
        self.settle("checkForUpdate", outcome)?;
        Ok(self.current())
    }

    async fn run_check(&self) -> Result<()> {
        let channel = self.settings.channel;
        let ctx = LogContext::new().with_command("checkForUpdate");

        match self.gateway.check_for_update(channel).await {
            Ok(report) => {
                self.shared.remember(report.version.as_deref());
                let available = self.availability(&report);
                match &available {
                    Some(version) => link_info!(
                        context = ctx,
                        "update {} available on {} channel",
                        version,
                        channel
                    ),
                    None => debug!(%channel, "no update available"),
                }
                self.shared
                    .transition(UpdateInput::CheckFinished { available });
                Ok(())
            }
            Err(err) => {
                link_warn!(context = ctx, "update check failed: {}", err);
                self.shared.transition(UpdateInput::Fail(err.clone()));
                Err(err)
            }
        }
    }

    /// Outcome of a spawned run. A run that panicked or was aborted leaves
    /// the machine failed rather than busy.
    fn settle(
        &self,
        command: &str,
        outcome: std::result::Result<Result<()>, JoinError>,
    ) -> Result<()> {
        match outcome {
            Ok(result) => result,
            Err(err) => {
                link_warn!(
                    context = LogContext::new().with_command(command),
                    "update task ended abnormally: {}",
                    err
                );
                self.shared
                    .transition(UpdateInput::Fail(BridgeError::ConnectionLost));
                Err(BridgeError::ConnectionLost)
            }
        }
    }

    fn availability(&self, report: &UpdateCheck) -> Option<String> {
        let newer = report
            .version
            .as_deref()
            .is_some_and(|candidate| self.version.is_superseded_by(candidate));
        if report.update_available || newer {
            Some(self.shared.announced_version(report.version.clone()))
        } else {
            None
        }
    }

    /// Install a downloaded update. Requires `ReadyToInstall`.
    pub async fn install(&self) -> Result<()> {
        if !self.shared.transition(UpdateInput::InstallStarted) {
            return Err(self.refuse("install"));
        }
        link_info!(
            context = LogContext::new().with_command("installUpdate"),
            "installing update"
        );
        let machine = self.clone();
        let outcome = tokio::spawn(async move {
            let result = machine.gateway.install_update().await;
            machine.finish(result)
        })
        .await;
        self.settle("installUpdate", outcome)
    }

    /// Relaunch into the installed update. Requires `Installing` or
    /// `ReadyToInstall`.
    pub async fn relaunch(&self) -> Result<()> {
        let current = self.current();
        if !matches!(current, UpdateState::Installing | UpdateState::ReadyToInstall) {
            return Err(self.refuse("relaunch"));
        }
        self.finish(self.gateway.relaunch().await)?;
        self.shared.transition(UpdateInput::Relaunched);
        Ok(())
    }

    fn finish(&self, result: Result<()>) -> Result<()> {
        if let Err(err) = &result {
            self.shared.transition(UpdateInput::Fail(err.clone()));
        }
        result
    }

    fn refuse(&self, action: &str) -> BridgeError {
        BridgeError::InvalidTransition {
            state: self.current().name().to_owned(),
            action: action.to_owned(),
        }
    }

    /// Re-check every `interval` while idle or failed. The first check runs
    /// immediately.
    pub fn spawn_poller(&self, interval: Duration) -> JoinHandle<()> {
        let machine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !machine.current().accepts_check() {
                    continue;
                }
                if let Err(err) = machine.check().await {
                    debug!(error = %err, "periodic update check failed");
                }
            }
        })
    }

    /// Stop following update notices.
    pub fn shutdown(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
    }
}

impl std::fmt::Debug for UpdateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateMachine")
            .field("state", &*self.shared.state.borrow())
            .field("settings", &self.settings)
            .field("version", &self.version.semver)
            .finish_non_exhaustive()
    }
}

/// Subscriptions taken before the listener task starts, so no notice
/// published after construction is missed.
struct Notices {
    available: Subscription<UpdateAvailable>,
    not_available: Subscription<UpdateNotAvailable>,
    progress: Subscription<DownloadProgress>,
    downloaded: Subscription<UpdateDownloaded>,
    lost: broadcast::Receiver<ConnectionNotice>,
}

impl Notices {
    fn subscribe(hub: &EventHub) -> Self {
        Self {
            available: hub.subscribe(),
            not_available: hub.subscribe(),
            progress: hub.subscribe(),
            downloaded: hub.subscribe(),
            lost: hub.connection_notices(),
        }
    }

    async fn follow(mut self, shared: Arc<Shared>) {
        loop {
            let input = tokio::select! {
                Some(notice) = self.available.recv() => UpdateInput::Announced {
                    version: shared.announced_version(notice.version),
                },
                Some(_) = self.not_available.recv() => UpdateInput::NotAvailable,
                Some(tick) = self.progress.recv() => UpdateInput::DownloadProgress {
                    percent: tick.percent(),
                },
                Some(notice) = self.downloaded.recv() => {
                    shared.remember(notice.version.as_deref());
                    UpdateInput::Downloaded
                }
                notice = self.lost.recv() => match notice {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => UpdateInput::ConnectionLost,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                else => break,
            };
            shared.transition(input);
        }
    }
}
