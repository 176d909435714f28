//! ---
//! cl_section: "01-shared-runtime"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Shared primitives for the control-plane bridge."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use strum::{AsRefStr, Display, EnumString};
use tracing::debug;

use crate::logging::LogFormat;

/// Port the core process listens on when it is not launched by the bridge.
pub const DEFAULT_CORE_PORT: u16 = 4650;

fn default_endpoint() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], DEFAULT_CORE_PORT))
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_start_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_reconnect_base() -> Duration {
    Duration::from_millis(250)
}

fn default_reconnect_max() -> Duration {
    Duration::from_secs(30)
}

fn default_reconnect_jitter() -> Duration {
    Duration::from_millis(100)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_change_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_update_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_auto_check() -> bool {
    true
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_metrics_enabled() -> bool {
    true
}

/// Primary configuration object for the bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub commands: CommandConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "CORELINK_CONFIG";

    /// Load configuration from disk, respecting the `CORELINK_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `CORELINK_CONFIG` path must exist. Missing candidates fall
    /// back to the built-in defaults so the launcher can start unconfigured.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!(
            inspected = candidates.len(),
            "no configuration file found; using defaults"
        );
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.heartbeat.validate()?;
        self.reconnect.validate()?;
        if self.commands.default_timeout.is_zero() {
            return Err(anyhow!("commands.default_timeout must be greater than zero"));
        }
        if self.migration.change_timeout.is_zero() {
            return Err(anyhow!("migration.change_timeout must be greater than zero"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Location of the core process and how to reach it.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: SocketAddr,
    #[serde(default = "default_connect_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
    /// Core binary to launch. When unset the fixed `endpoint` is dialled.
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Runtime directory handed to a launched core.
    #[serde(default)]
    pub runtime_path: Option<PathBuf>,
    #[serde(default = "default_start_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub start_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout: default_connect_timeout(),
            executable: None,
            runtime_path: None,
            start_timeout: default_start_timeout(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval: Duration,
    #[serde(default = "default_heartbeat_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub timeout: Duration,
}

impl HeartbeatConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow!("heartbeat.interval must be greater than zero"));
        }
        if self.timeout <= self.interval {
            return Err(anyhow!(
                "heartbeat.timeout ({:?}) must exceed heartbeat.interval ({:?})",
                self.timeout,
                self.interval
            ));
        }
        Ok(())
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: default_heartbeat_interval(),
            timeout: default_heartbeat_timeout(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_base")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_delay: Duration,
    #[serde(default = "default_reconnect_max")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
    #[serde(default = "default_reconnect_jitter")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub jitter: Duration,
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_delay.is_zero() {
            return Err(anyhow!("reconnect.base_delay must be greater than zero"));
        }
        if self.max_delay < self.base_delay {
            return Err(anyhow!(
                "reconnect.max_delay must not be smaller than reconnect.base_delay"
            ));
        }
        Ok(())
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: default_reconnect_base(),
            max_delay: default_reconnect_max(),
            jitter: default_reconnect_jitter(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    #[serde(default = "default_command_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub default_timeout: Duration,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_command_timeout(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(default = "default_change_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub change_timeout: Duration,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            change_timeout: default_change_timeout(),
        }
    }
}

/// Release channel the core queries when checking for updates.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReleaseChannel {
    #[default]
    Stable,
    Beta,
    Alpha,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateConfig {
    #[serde(default)]
    pub channel: ReleaseChannel,
    #[serde(default = "default_update_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default = "default_auto_check")]
    pub auto_check: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            channel: ReleaseChannel::default(),
            poll_interval: default_update_interval(),
            auto_check: default_auto_check(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Also write a daily rolling file beneath `directory`.
    #[serde(default)]
    pub to_file: bool,
    /// Filter directive used when neither `CORELINK_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            to_file: false,
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: AppConfig = "".parse().unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.core.endpoint.port(), DEFAULT_CORE_PORT);
        assert_eq!(config.commands.default_timeout, Duration::from_secs(30));
        assert_eq!(config.update.poll_interval, Duration::from_secs(1800));
        assert!(!config.logging.to_file);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn logging_section_is_read() {
        let config: AppConfig = r#"
            [logging]
            format = "pretty"
            level = "corelink_channel=debug"
            to_file = true
        "#
        .parse()
        .unwrap();
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.level, "corelink_channel=debug");
        assert!(config.logging.to_file);
        assert!(config.logging.file_prefix.is_none());
    }

    #[test]
    fn durations_are_millisecond_integers() {
        let config: AppConfig = r#"
            [heartbeat]
            interval = 200
            timeout = 900

            [update]
            channel = "beta"
        "#
        .parse()
        .unwrap();
        assert_eq!(config.heartbeat.interval, Duration::from_millis(200));
        assert_eq!(config.heartbeat.timeout, Duration::from_millis(900));
        assert_eq!(config.update.channel, ReleaseChannel::Beta);
    }

    #[test]
    fn heartbeat_timeout_must_exceed_interval() {
        let err = r#"
            [heartbeat]
            interval = 1000
            timeout = 1000
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("heartbeat.timeout"));
    }

    #[test]
    fn reconnect_bounds_are_checked() {
        let err = r#"
            [reconnect]
            base_delay = 500
            max_delay = 100
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("max_delay"));
    }

    #[test]
    fn release_channel_round_trips_through_strum() {
        assert_eq!("alpha".parse::<ReleaseChannel>().unwrap(), ReleaseChannel::Alpha);
        assert_eq!(ReleaseChannel::Stable.to_string(), "stable");
    }
}
