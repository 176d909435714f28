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

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use corelink_common::{init_tracing, AppConfig, VersionInfo};
use corelink_core::{Bridge, BridgeHandle};
use serde_json::{json, Value};
use tokio::runtime::Runtime;

mod host;
mod runtime_path;
mod update;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Drive the corelink bridge against a running core process",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,
    /// Configuration file (CORELINK_CONFIG takes precedence).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Log filter directive, e.g. `debug` or `corelink_channel=trace`.
    #[arg(long, global = true, value_name = "DIRECTIVE")]
    log_level: Option<String>,
    /// Also write a rolling log file under the configured log directory.
    #[arg(long, global = true)]
    log_file: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Connect and report connection and state-machine status.
    Status,
    #[command(subcommand, name = "runtime-path", about = "Runtime directory actions")]
    RuntimePath(runtime_path::RuntimePathCommand),
    #[command(subcommand, about = "Update lifecycle actions")]
    Update(update::UpdateCommand),
    /// Report the platform the core runs on.
    Os,
    /// Ask the core to open a URL in the default browser.
    #[command(name = "open-link")]
    OpenLink { url: String },
    /// Ask the core to reveal a folder in the file manager.
    #[command(name = "open-folder")]
    OpenFolder { path: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().extended());
        return Ok(());
    }
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let mut config = load_config(cli.config)?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.to_file |= cli.log_file;
    let _log_guard = init_tracing(env!("CARGO_PKG_NAME"), &config.logging)?;

    let runtime = Runtime::new()?;
    let output = runtime.block_on(execute(config, command))?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_config(explicit: Option<PathBuf>) -> Result<AppConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path);
    }
    candidates.push(PathBuf::from("corelink.toml"));
    candidates.push(PathBuf::from("configs/corelink.toml"));
    let mut config = AppConfig::load(&candidates)?;
    // One-shot sessions never poll in the background.
    config.update.auto_check = false;
    Ok(config)
}

async fn execute(config: AppConfig, command: Commands) -> Result<Value> {
    let connect_timeout = config.core.connect_timeout;
    let bridge = Bridge::new(config, None).start().await?;
    let connected = bridge
        .channel()
        .wait_connected(connect_timeout)
        .await
        .with_context(|| format!("core process at {} is not reachable", bridge.endpoint()));

    let outcome = match connected {
        Ok(()) => run(&bridge, command).await,
        Err(err) => Err(err),
    };
    bridge.shutdown().await?;
    outcome
}

async fn run(bridge: &BridgeHandle, command: Commands) -> Result<Value> {
    match command {
        Commands::Status => Ok(json!({
            "endpoint": bridge.endpoint(),
            "connection": bridge.connection(),
            "version": bridge.version(),
            "migration": bridge.migration().current(),
            "update": bridge.update().current(),
        })),
        Commands::RuntimePath(cmd) => runtime_path::run(bridge, cmd).await,
        Commands::Update(cmd) => update::run(bridge, cmd).await,
        Commands::Os => host::os(bridge).await,
        Commands::OpenLink { url } => host::open_link(bridge, url).await,
        Commands::OpenFolder { path } => host::open_folder(bridge, path).await,
    }
}
