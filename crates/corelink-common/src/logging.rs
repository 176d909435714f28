//! ---
//! cl_section: "01-shared-runtime"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Tracing subscriber setup for bridge processes."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "CORELINK_LOG";
const FALLBACK_DIRECTIVE: &str = "info";

/// Console log formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Keeps the background log writers running. Buffered lines are flushed when
/// it is dropped, so hold it until the process exits.
#[must_use = "dropping the guard stops the log writers"]
pub struct LogGuard {
    _console: WorkerGuard,
    _file: Option<WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LogGuard {
    /// Directory of the rolling log file, when file output is on.
    pub fn log_dir(&self) -> Option<&PathBuf> {
        self.log_dir.as_ref()
    }
}

impl std::fmt::Debug for LogGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogGuard")
            .field("log_dir", &self.log_dir)
            .finish_non_exhaustive()
    }
}

/// Install the process-wide subscriber.
///
/// Console output goes to stderr; stdout is left to command results. With
/// `to_file` set, a daily rolling JSON file named after `file_prefix` (or
/// `service_name`) is written beneath `directory` as well. The filter comes
/// from `CORELINK_LOG`, then `RUST_LOG`, then `config.level`.
///
/// Only the first call in a process installs a subscriber. Later calls still
/// return a guard but their output is discarded.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<LogGuard> {
    let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stderr());
    let console_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(console_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(console_writer)
            .boxed(),
    };

    let (file_layer, file_guard, log_dir) = if config.to_file {
        std::fs::create_dir_all(&config.directory).with_context(|| {
            format!("creating log directory {}", config.directory.display())
        })?;
        let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
        let appender = daily(&config.directory, format!("{prefix}.log"));
        let (file_writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(file_writer)
            .boxed();
        (Some(layer), Some(guard), Some(config.directory.clone()))
    } else {
        (None, None, None)
    };

    let filter = resolve_filter(
        std::env::var(LOG_ENV)
            .or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV))
            .ok(),
        &config.level,
    );

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    if installed {
        debug!(service = %service_name, log_dir = ?log_dir, format = ?config.format, "tracing initialised");
    }

    Ok(LogGuard {
        _console: console_guard,
        _file: file_guard,
        log_dir,
    })
}

/// Environment directive first, then the configured level. Anything that
/// does not parse falls back to `info`.
fn resolve_filter(env_directive: Option<String>, level: &str) -> EnvFilter {
    let directive = env_directive.unwrap_or_else(|| level.to_owned());
    EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("invalid log directive {directive:?} ({err}); using {FALLBACK_DIRECTIVE}");
        EnvFilter::new(FALLBACK_DIRECTIVE)
    })
}
