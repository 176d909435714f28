//! ---
//! cl_section: "04-liveness-channel"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Core process startup and port discovery."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use corelink_common::CoreConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Prefix of the stdout line on which the core announces its listening port.
pub const STATUS_PREFIX: &str = "_STATUS_:|";

/// Extract the announced port from one line of core output.
pub fn parse_status_line(line: &str) -> Option<u16> {
    line.trim()
        .strip_prefix(STATUS_PREFIX)
        .and_then(|rest| rest.trim().parse::<u16>().ok())
        .filter(|port| *port != 0)
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to start core process {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("core process exited before announcing its port")]
    Exited,
    #[error("core process did not announce its port within {0:?}")]
    NoStatusLine(Duration),
    #[error("io error while reading core output: {0}")]
    Io(#[from] std::io::Error),
}

/// Starts the core binary and discovers its endpoint.
#[derive(Debug, Clone)]
pub struct CoreLauncher {
    executable: PathBuf,
    runtime_path: Option<PathBuf>,
    start_timeout: Duration,
    host: IpAddr,
}

impl CoreLauncher {
    pub fn new(executable: impl Into<PathBuf>, start_timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            runtime_path: None,
            start_timeout,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    /// Launcher for the configured executable, if one is configured.
    pub fn from_config(config: &CoreConfig) -> Option<Self> {
        let executable = config.executable.clone()?;
        let launcher = Self::new(executable, config.start_timeout);
        Some(match &config.runtime_path {
            Some(path) => launcher.runtime_path(path.clone()),
            None => launcher,
        })
    }

    /// Directory passed to the core as `--runtime_path`.
    pub fn runtime_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.runtime_path = Some(path.into());
        self
    }

    /// Spawn the core and wait for its status line.
    pub async fn spawn(&self) -> Result<CoreProcess, LaunchError> {
        let mut command = Command::new(&self.executable);
        if let Some(path) = &self.runtime_path {
            command.arg("--runtime_path").arg(path);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
            path: self.executable.clone(),
            source,
        })?;
        let stdout = child.stdout.take().ok_or(LaunchError::Exited)?;

        let mut lines = BufReader::new(stdout).lines();
        let port = tokio::time::timeout(self.start_timeout, async {
            while let Some(line) = lines.next_line().await? {
                if let Some(port) = parse_status_line(&line) {
                    return Ok::<u16, LaunchError>(port);
                }
                debug!(target: "corelink::core", "{line}");
            }
            Err(LaunchError::Exited)
        })
        .await
        .map_err(|_| LaunchError::NoStatusLine(self.start_timeout))??;

        tokio::spawn(drain_output(lines));
        let endpoint = SocketAddr::new(self.host, port);
        info!(executable = %self.executable.display(), %endpoint, pid = ?child.id(), "core process started");
        Ok(CoreProcess { child, endpoint })
    }
}

async fn drain_output(mut lines: tokio::io::Lines<BufReader<ChildStdout>>) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "corelink::core", "{line}"),
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "stopped reading core output");
                break;
            }
        }
    }
}

/// A running core process. Dropping it kills the process.
#[derive(Debug)]
pub struct CoreProcess {
    child: Child,
    endpoint: SocketAddr,
}

impl CoreProcess {
    /// Endpoint announced by the core.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Kill the core and reap it.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_is_recognised() {
        assert_eq!(parse_status_line("_STATUS_:|4650"), Some(4650));
        assert_eq!(parse_status_line("  _STATUS_:| 51234 \r"), Some(51234));
    }

    #[test]
    fn other_output_is_ignored() {
        assert_eq!(parse_status_line("starting core"), None);
        assert_eq!(parse_status_line("_STATUS_:|"), None);
        assert_eq!(parse_status_line("_STATUS_:|0"), None);
        assert_eq!(parse_status_line("_STATUS_:|99999"), None);
    }
}
