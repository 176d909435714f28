//! ---
//! cl_section: "06-state-machines"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Bridge facade wiring channel, gateway, hub and state machines."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use corelink_channel::{
    ChannelHandle, ChannelSettings, Connection, CoreLauncher, CoreProcess, LivenessChannel,
};
use corelink_common::{AppConfig, VersionInfo};
use corelink_gateway::{CommandGateway, EventHub, GatewaySettings};
use corelink_metrics::{new_registry, BridgeMetrics, SharedRegistry};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::migration::{MigrationMachine, MigrationSettings};
use crate::update::{UpdateMachine, UpdateSettings};

/// Entry point that assembles every bridge component from configuration.
#[derive(Debug)]
pub struct Bridge {
    config: Arc<AppConfig>,
    version: VersionInfo,
    metrics_registry: Option<SharedRegistry>,
}

impl Bridge {
    pub fn new(config: AppConfig, metrics: Option<SharedRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            version: VersionInfo::current(),
            metrics_registry: metrics,
        }
    }

    /// Report a different running version to the update machine.
    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    /// Start the core (when configured), the channel and both machines.
    pub async fn start(self) -> Result<BridgeHandle> {
        self.config.validate()?;

        let metrics = if self.config.metrics.enabled {
            let registry = self.metrics_registry.clone().unwrap_or_else(new_registry);
            Some(BridgeMetrics::new(registry).context("failed to register bridge metrics")?)
        } else {
            None
        };

        let (core, endpoint) = match CoreLauncher::from_config(&self.config.core) {
            Some(launcher) => {
                let process = launcher
                    .spawn()
                    .await
                    .context("failed to start the core process")?;
                let endpoint = process.endpoint();
                (Some(process), endpoint)
            }
            None => (None, self.config.core.endpoint),
        };

        let gateway = CommandGateway::new(GatewaySettings::from(&*self.config), metrics.clone());
        let hub = EventHub::with_metrics(metrics.clone());
        let channel = LivenessChannel::tcp(ChannelSettings::from(&*self.config))
            .observe(gateway.observer())
            .observe(Arc::new(hub.clone()))
            .with_metrics(metrics.clone())
            .connect(endpoint);
        gateway.attach(channel.clone());

        let migration = MigrationMachine::new(
            gateway.clone(),
            hub.clone(),
            MigrationSettings::from(&*self.config),
        );
        let update_settings = UpdateSettings::from(&*self.config);
        let update = UpdateMachine::new(
            gateway.clone(),
            &hub,
            update_settings.clone(),
            self.version.clone(),
        );
        let poller = self
            .config
            .update
            .auto_check
            .then(|| update.spawn_poller(update_settings.poll_interval));

        info!(
            %endpoint,
            version = %self.version.semver,
            launched = core.is_some(),
            channel = %update_settings.channel,
            "bridge started"
        );

        Ok(BridgeHandle {
            config: self.config,
            version: self.version,
            endpoint,
            channel,
            gateway,
            hub,
            migration,
            update,
            poller,
            core,
            metrics,
        })
    }
}

/// Running bridge. Dropping it without [`BridgeHandle::shutdown`] leaves
/// the channel task running until the runtime stops.
pub struct BridgeHandle {
    config: Arc<AppConfig>,
    version: VersionInfo,
    endpoint: SocketAddr,
    channel: ChannelHandle,
    gateway: CommandGateway,
    hub: EventHub,
    migration: MigrationMachine,
    update: UpdateMachine,
    poller: Option<JoinHandle<()>>,
    core: Option<CoreProcess>,
    metrics: Option<BridgeMetrics>,
}

impl BridgeHandle {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn version(&self) -> &VersionInfo {
        &self.version
    }

    /// Endpoint the channel dials.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn connection(&self) -> Connection {
        self.channel.connection()
    }

    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    pub fn gateway(&self) -> &CommandGateway {
        &self.gateway
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn migration(&self) -> &MigrationMachine {
        &self.migration
    }

    pub fn update(&self) -> &UpdateMachine {
        &self.update
    }

    pub fn metrics(&self) -> Option<SharedRegistry> {
        self.metrics.as_ref().map(BridgeMetrics::registry)
    }

    /// Stop every task permanently and terminate a launched core.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        self.update.shutdown();
        self.channel.shutdown().await;
        if let Some(mut core) = self.core.take() {
            if let Err(err) = core.kill().await {
                warn!(error = %err, pid = ?core.id(), "failed to stop core process");
            }
        }
        info!(endpoint = %self.endpoint, "bridge shutdown complete");
        Ok(())
    }
}

impl std::fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHandle")
            .field("endpoint", &self.endpoint)
            .field("connection", &self.channel.connection())
            .field("migration", &self.migration.current())
            .field("update", &self.update.current())
            .finish_non_exhaustive()
    }
}
