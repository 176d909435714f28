//! ---
//! cl_section: "06-state-machines"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Runtime-path migration state machine."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use corelink_common::AppConfig;
use corelink_gateway::{CommandGateway, EventHub};
use corelink_logging::{link_info, link_warn, LogContext};
use corelink_msg::event::{ChangeRuntimePathProgress, RuntimePathProgress};
use corelink_msg::{BridgeError, Result};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Observable progress of a runtime-path change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum MigrationState {
    Idle,
    Validating { path: PathBuf },
    Changing { path: PathBuf, progress: u8 },
    Succeeded { path: PathBuf },
    Failed { reason: BridgeError },
}

impl MigrationState {
    pub fn name(&self) -> &'static str {
        match self {
            MigrationState::Idle => "idle",
            MigrationState::Validating { .. } => "validating",
            MigrationState::Changing { .. } => "changing",
            MigrationState::Succeeded { .. } => "succeeded",
            MigrationState::Failed { .. } => "failed",
        }
    }

    /// Whether a migration is running.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            MigrationState::Validating { .. } | MigrationState::Changing { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationState::Succeeded { .. } | MigrationState::Failed { .. }
        )
    }

    /// Progress of a running change.
    pub fn progress(&self) -> Option<u8> {
        match self {
            MigrationState::Changing { progress, .. } => Some(*progress),
            _ => None,
        }
    }
}

/// Everything that can move the migration machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationInput {
    /// A change to `path` was requested.
    Begin(PathBuf),
    /// The core accepted the path.
    Validated,
    /// Progress reported for the change to `path`.
    Progress { path: PathBuf, percent: u8 },
    /// The change command resolved successfully.
    Completed,
    Fail(BridgeError),
    /// Clear a terminal state.
    Reset,
}

/// Pure transition function. `None` means the input does not apply.
pub fn apply(state: &MigrationState, input: MigrationInput) -> Option<MigrationState> {
    use MigrationState::*;

    match (state, input) {
        (Idle, MigrationInput::Begin(path)) => Some(Validating { path }),
        (Validating { path }, MigrationInput::Validated) => Some(Changing {
            path: path.clone(),
            progress: 0,
        }),
        (
            Changing { path, progress },
            MigrationInput::Progress {
                path: reported,
                percent,
            },
        ) if *path == reported && *progress != percent => Some(Changing {
            path: reported,
            progress: percent.min(100),
        }),
        (Changing { path, .. }, MigrationInput::Completed) => {
            Some(Succeeded { path: path.clone() })
        }
        (Validating { .. } | Changing { .. }, MigrationInput::Fail(reason)) => {
            Some(Failed { reason })
        }
        (Succeeded { .. } | Failed { .. }, MigrationInput::Reset) => Some(Idle),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct MigrationSettings {
    /// Upper bound for the change command itself.
    pub change_timeout: Duration,
}

impl From<&AppConfig> for MigrationSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            change_timeout: config.migration.change_timeout,
        }
    }
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Current and default runtime directories as reported by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimePaths {
    pub current: PathBuf,
    pub initial: PathBuf,
}

/// Drives validating and switching the runtime directory.
#[derive(Clone)]
pub struct MigrationMachine {
    gateway: CommandGateway,
    hub: EventHub,
    settings: MigrationSettings,
    state: Arc<watch::Sender<MigrationState>>,
}

impl MigrationMachine {
    pub fn new(gateway: CommandGateway, hub: EventHub, settings: MigrationSettings) -> Self {
        let (state, _) = watch::channel(MigrationState::Idle);
        Self {
            gateway,
            hub,
            settings,
            state: Arc::new(state),
        }
    }

    /// Read-only view of the state.
    pub fn state(&self) -> watch::Receiver<MigrationState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> MigrationState {
        self.state.borrow().clone()
    }

    fn transition(&self, input: MigrationInput) -> bool {
        self.state.send_if_modified(|state| match apply(state, input) {
            Some(next) => {
                debug!(from = state.name(), to = next.name(), "migration transition");
                *state = next;
                true
            }
            None => false,
        })
    }

    /// Return a terminal state to `Idle`.
    pub fn reset(&self) -> Result<()> {
        let current = self.current();
        if current.is_busy() {
            return Err(BridgeError::InvalidTransition {
                state: current.name().to_owned(),
                action: "reset".to_owned(),
            });
        }
        self.transition(MigrationInput::Reset);
        Ok(())
    }

    /// Fetch the current and default runtime directories.
    pub async fn load_current(&self) -> Result<RuntimePaths> {
        let (current, initial) = tokio::try_join!(
            self.gateway.get_runtime_path(),
            self.gateway.get_initial_runtime_path()
        )?;
        Ok(RuntimePaths { current, initial })
    }

    /// Validate `path` and switch the runtime directory to it.
    ///
    /// Resolves once the machine reaches a terminal state, with the same
    /// outcome the state reports. Fails with
    /// [`BridgeError::MigrationInProgress`] without touching the state when
    /// another migration is running. The run continues on its own task when
    /// the returned future is dropped, and still ends in a terminal state.
    pub async fn request_change(&self, path: impl Into<PathBuf>) -> Result<PathBuf> {
        let path = path.into();
        if self.current().is_terminal() {
            self.transition(MigrationInput::Reset);
        }
        if !self.transition(MigrationInput::Begin(path.clone())) {
            return Err(BridgeError::MigrationInProgress);
        }

        let run = tokio::spawn(self.clone().run(path));
        match run.await {
            Ok(outcome) => outcome,
            Err(err) => {
                link_warn!(
                    context = LogContext::new().with_command("changeRuntimePath"),
                    "runtime-path migration task ended abnormally: {}",
                    err
                );
                self.transition(MigrationInput::Fail(BridgeError::ConnectionLost));
                Err(BridgeError::ConnectionLost)
            }
        }
    }

    async fn run(self, path: PathBuf) -> Result<PathBuf> {
        let ctx = LogContext::new().with_command("changeRuntimePath");
        link_info!(context = ctx.clone(), "migrating runtime path to {}", path.display());

        let outcome = match self.validate(&path).await {
            Ok(()) => {
                self.transition(MigrationInput::Validated);
                self.change(&path).await
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                self.transition(MigrationInput::Completed);
                link_info!(context = ctx, "runtime path now {}", path.display());
                Ok(path)
            }
            Err(err) => {
                self.transition(MigrationInput::Fail(err.clone()));
                link_warn!(context = ctx, "runtime-path migration failed: {}", err);
                Err(err)
            }
        }
    }

    async fn validate(&self, path: &Path) -> Result<()> {
        let report = self.gateway.validate_runtime_path(path).await?;
        if report.validity.is_acceptable() {
            Ok(())
        } else {
            Err(BridgeError::InvalidPath(
                report
                    .reason
                    .unwrap_or_else(|| path.display().to_string()),
            ))
        }
    }

    async fn change(&self, path: &Path) -> Result<()> {
        // Subscribe before sending so no early tick is missed.
        let mut steps = self.hub.subscribe::<RuntimePathProgress>();
        let mut overall = self.hub.subscribe::<ChangeRuntimePathProgress>();
        let mut notices = self.hub.connection_notices();

        let change = self
            .gateway
            .change_runtime_path(path, Some(self.settings.change_timeout));
        tokio::pin!(change);

        loop {
            tokio::select! {
                biased;
                Some(tick) = steps.recv() => self.progress(path, tick.percent()),
                Some(tick) = overall.recv() => self.progress(path, tick.percent()),
                notice = notices.recv() => match notice {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        return Err(BridgeError::ConnectionLost);
                    }
                    Err(broadcast::error::RecvError::Closed) => {}
                },
                result = &mut change => return result,
            }
        }
    }

    fn progress(&self, path: &Path, percent: u8) {
        self.transition(MigrationInput::Progress {
            path: path.to_path_buf(),
            percent,
        });
    }
}

impl std::fmt::Debug for MigrationMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationMachine")
            .field("state", &*self.state.borrow())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
