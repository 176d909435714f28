//! ---
//! cl_section: "05-command-gateway"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Correlated request/response dispatch over the liveness channel."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use corelink_channel::{ChannelHandle, ChannelObserver, CloseReason};
use corelink_common::{AppConfig, ReleaseChannel};
use corelink_logging::{link_debug, link_warn, LogContext};
use corelink_metrics::{BridgeMetrics, CommandOutcome};
use corelink_msg::command::{
    ChangeRuntimePath, CheckForUpdate, CopyToClipboard, FileDialogResult, GetCurrentOs,
    GetInitialRuntimePath, GetRuntimePath, InstallUpdate, OpenExternalLink, OpenFileDialog,
    OpenFolder, OsInfo, Relaunch, SaveDialogResult, ShowSaveDialog, UpdateCheck,
    ValidateRuntimePath, ValidationReport,
};
use corelink_msg::{BridgeError, CommandName, Deadline, Frame, Request, Result};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Deadline for commands using [`Deadline::Default`].
    pub default_timeout: Duration,
}

impl From<&AppConfig> for GatewaySettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_timeout: config.commands.default_timeout,
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

struct Pending {
    command: CommandName,
    replaces_process: bool,
    reply: oneshot::Sender<Result<Value>>,
}

/// Requests awaiting a response on the current connection.
#[derive(Default)]
struct Inflight {
    pending: Mutex<HashMap<u64, Pending>>,
    next_id: AtomicU64,
}

impl Inflight {
    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn remove(&self, id: u64) -> Option<Pending> {
        self.pending.lock().remove(&id)
    }
}

impl ChannelObserver for Inflight {
    fn on_frame(&self, frame: &Frame) {
        let Frame::Response { id, result, error } = frame else {
            return;
        };
        let Some(pending) = self.remove(*id) else {
            link_warn!(
                context = LogContext::new().with_correlation_id(*id),
                "response for unknown or expired request"
            );
            return;
        };
        let outcome = match error {
            Some(fault) => Err(BridgeError::from(fault.clone())),
            None => Ok(result.clone().unwrap_or(Value::Null)),
        };
        let _ = pending.reply.send(outcome);
    }

    fn on_close(&self, reason: &CloseReason) {
        let drained: Vec<(u64, Pending)> = self.pending.lock().drain().collect();
        for (id, pending) in drained {
            let outcome = if pending.replaces_process && !reason.is_shutdown() {
                Ok(Value::Null)
            } else {
                Err(BridgeError::ConnectionLost)
            };
            link_debug!(
                context = LogContext::new()
                    .with_command(pending.command.as_ref())
                    .with_correlation_id(id),
                "request ended by connection close: {}",
                reason
            );
            let _ = pending.reply.send(outcome);
        }
    }
}

/// Removes the pending entry if the caller stops waiting early.
struct PendingGuard<'a> {
    inflight: &'a Inflight,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inflight.remove(self.id);
    }
}

/// Typed request/response surface over the liveness channel.
#[derive(Clone)]
pub struct CommandGateway {
    inflight: Arc<Inflight>,
    channel: Arc<OnceCell<ChannelHandle>>,
    settings: GatewaySettings,
    metrics: Option<BridgeMetrics>,
}

impl CommandGateway {
    pub fn new(settings: GatewaySettings, metrics: Option<BridgeMetrics>) -> Self {
        Self {
            inflight: Arc::new(Inflight::default()),
            channel: Arc::new(OnceCell::new()),
            settings,
            metrics,
        }
    }

    /// Observer to register on the liveness channel before connecting.
    pub fn observer(&self) -> Arc<dyn ChannelObserver> {
        self.inflight.clone()
    }

    /// Bind the gateway to its channel. Only the first call has an effect.
    pub fn attach(&self, channel: ChannelHandle) {
        let _ = self.channel.set(channel);
    }

    /// Number of requests awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.inflight.pending.lock().len()
    }

    /// Issue a command using its default deadline policy.
    pub async fn call<R: Request>(&self, request: &R) -> Result<R::Response> {
        let deadline = match R::DEADLINE {
            Deadline::Default => Some(self.settings.default_timeout),
            Deadline::Unbounded => None,
        };
        self.call_within(request, deadline).await
    }

    /// Issue a command with an explicit deadline. `None` waits until a
    /// response or a connection loss.
    pub async fn call_within<R: Request>(
        &self,
        request: &R,
        deadline: Option<Duration>,
    ) -> Result<R::Response> {
        let started = Instant::now();
        let result = self.dispatch(request, deadline).await;
        if let Some(metrics) = &self.metrics {
            let outcome = match &result {
                Ok(_) => CommandOutcome::Success,
                Err(BridgeError::Backend { .. } | BridgeError::InvalidPath(_)) => {
                    CommandOutcome::BackendError
                }
                Err(BridgeError::Timeout { .. }) => CommandOutcome::Timeout,
                Err(BridgeError::ConnectionLost) => CommandOutcome::ConnectionLost,
                Err(_) => CommandOutcome::Other,
            };
            metrics.observe_command(R::NAME.as_ref(), outcome, started.elapsed());
        }
        result
    }

    async fn dispatch<R: Request>(
        &self,
        request: &R,
        deadline: Option<Duration>,
    ) -> Result<R::Response> {
        let channel = self.channel.get().ok_or(BridgeError::ConnectionLost)?;
        let id = self.inflight.allocate();
        let frame = Frame::request(id, request)?;
        let command = R::NAME;
        let ctx = LogContext::new()
            .with_command(command.as_ref())
            .with_correlation_id(id);

        let (reply, response) = oneshot::channel();
        self.inflight.pending.lock().insert(
            id,
            Pending {
                command: R::NAME,
                replaces_process: R::REPLACES_PROCESS,
                reply,
            },
        );
        let _guard = PendingGuard {
            inflight: &self.inflight,
            id,
        };

        channel.send(frame)?;
        link_debug!(context = ctx.clone(), "request sent");

        let received = match deadline {
            Some(after) => match tokio::time::timeout(after, response).await {
                Ok(received) => received,
                Err(_) => {
                    link_warn!(context = ctx, "no response within {:?}", after);
                    return Err(BridgeError::Timeout {
                        command: command.to_string(),
                        after,
                    });
                }
            },
            None => response.await,
        };

        let value = received.map_err(|_| BridgeError::ConnectionLost)??;
        serde_json::from_value(value).map_err(|err| {
            BridgeError::Serialization(format!("`{command}` result: {err}"))
        })
    }

    pub async fn get_runtime_path(&self) -> Result<PathBuf> {
        Ok(self.call(&GetRuntimePath {}).await?.path)
    }

    pub async fn get_initial_runtime_path(&self) -> Result<PathBuf> {
        Ok(self.call(&GetInitialRuntimePath {}).await?.path)
    }

    pub async fn validate_runtime_path(&self, path: impl Into<PathBuf>) -> Result<ValidationReport> {
        self.call(&ValidateRuntimePath { path: path.into() }).await
    }

    /// Start a runtime-path change bounded only by `budget`.
    pub async fn change_runtime_path(
        &self,
        path: impl Into<PathBuf>,
        budget: Option<Duration>,
    ) -> Result<()> {
        self.call_within(&ChangeRuntimePath { path: path.into() }, budget)
            .await
            .map(|_| ())
    }

    pub async fn check_for_update(&self, channel: ReleaseChannel) -> Result<UpdateCheck> {
        self.call(&CheckForUpdate { channel }).await
    }

    /// Resolves `Ok` if the core goes away while installing.
    pub async fn install_update(&self) -> Result<()> {
        self.call(&InstallUpdate {}).await.map(|_| ())
    }

    /// Resolves `Ok` if the core goes away while relaunching.
    pub async fn relaunch(&self) -> Result<()> {
        self.call(&Relaunch {}).await.map(|_| ())
    }

    pub async fn open_external_link(&self, url: impl Into<String>) -> Result<()> {
        self.call(&OpenExternalLink { url: url.into() })
            .await
            .map(|_| ())
    }

    pub async fn copy_to_clipboard(&self, text: impl Into<String>) -> Result<()> {
        self.call(&CopyToClipboard { text: text.into() })
            .await
            .map(|_| ())
    }

    pub async fn open_file_dialog(&self, request: OpenFileDialog) -> Result<FileDialogResult> {
        self.call(&request).await
    }

    pub async fn show_save_dialog(&self, request: ShowSaveDialog) -> Result<SaveDialogResult> {
        self.call(&request).await
    }

    pub async fn open_folder(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.call(&OpenFolder { path: path.into() })
            .await
            .map(|_| ())
    }

    pub async fn get_current_os(&self) -> Result<OsInfo> {
        self.call(&GetCurrentOs {}).await
    }
}

impl std::fmt::Debug for CommandGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGateway")
            .field("in_flight", &self.in_flight())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
