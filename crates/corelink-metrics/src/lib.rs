//! ---
//! cl_section: "03-logging-metrics"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Metrics collection for the control-plane bridge."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

/// Shared registry type used across the bridge.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Outcome label recorded for every finished command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    BackendError,
    Timeout,
    ConnectionLost,
    Other,
}

impl CommandOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandOutcome::Success => "success",
            CommandOutcome::BackendError => "backend_error",
            CommandOutcome::Timeout => "timeout",
            CommandOutcome::ConnectionLost => "connection_lost",
            CommandOutcome::Other => "other",
        }
    }
}

/// Counters and histograms published by the bridge.
#[derive(Clone)]
pub struct BridgeMetrics {
    registry: SharedRegistry,
    commands_total: IntCounterVec,
    command_latency_seconds: HistogramVec,
    reconnects_total: IntCounter,
    heartbeat_timeouts_total: IntCounter,
    events_total: IntCounterVec,
}

impl BridgeMetrics {
    /// Register the bridge metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let commands_total = IntCounterVec::new(
            Opts::new(
                "corelink_commands_total",
                "Commands issued to the core process by outcome",
            ),
            &["command", "outcome"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "corelink_command_latency_seconds",
            "Time between issuing a command and receiving its response",
        )
        .buckets(prometheus::exponential_buckets(0.001, 2.0, 16)?);
        let command_latency_seconds = HistogramVec::new(histogram_opts, &["command"])?;
        registry.register(Box::new(command_latency_seconds.clone()))?;

        let reconnects_total = IntCounter::with_opts(Opts::new(
            "corelink_reconnects_total",
            "Connections re-established after a drop",
        ))?;
        registry.register(Box::new(reconnects_total.clone()))?;

        let heartbeat_timeouts_total = IntCounter::with_opts(Opts::new(
            "corelink_heartbeat_timeouts_total",
            "Connections declared dead because a liveness probe went unanswered",
        ))?;
        registry.register(Box::new(heartbeat_timeouts_total.clone()))?;

        let events_total = IntCounterVec::new(
            Opts::new("corelink_events_total", "Events published by the core process"),
            &["topic"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        Ok(Self {
            registry,
            commands_total,
            command_latency_seconds,
            reconnects_total,
            heartbeat_timeouts_total,
            events_total,
        })
    }

    /// Expose the underlying shared registry for convenience.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn observe_command(&self, command: &str, outcome: CommandOutcome, elapsed: Duration) {
        self.commands_total
            .with_label_values(&[command, outcome.as_str()])
            .inc();
        self.command_latency_seconds
            .with_label_values(&[command])
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_reconnect(&self) {
        self.reconnects_total.inc();
    }

    pub fn inc_heartbeat_timeout(&self) {
        self.heartbeat_timeouts_total.inc();
    }

    pub fn inc_event(&self, topic: &str) {
        self.events_total.with_label_values(&[topic]).inc();
    }
}

impl std::fmt::Debug for BridgeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_gather() {
        let metrics = BridgeMetrics::new(new_registry()).unwrap();
        metrics.observe_command(
            "getRuntimePath",
            CommandOutcome::Success,
            Duration::from_millis(3),
        );
        metrics.inc_reconnect();
        metrics.inc_event("runtimePathProgress");

        let names: Vec<String> = metrics
            .registry()
            .gather()
            .into_iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        assert!(names.contains(&"corelink_commands_total".to_owned()));
        assert!(names.contains(&"corelink_reconnects_total".to_owned()));
        assert!(names.contains(&"corelink_events_total".to_owned()));
    }

    #[test]
    fn double_registration_is_rejected() {
        let registry = new_registry();
        BridgeMetrics::new(registry.clone()).unwrap();
        assert!(BridgeMetrics::new(registry).is_err());
    }
}
