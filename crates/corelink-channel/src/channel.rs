//! ---
//! cl_section: "04-liveness-channel"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Connection lifecycle and keepalive for the core process."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use corelink_common::AppConfig;
use corelink_logging::{link_debug, link_info, link_warn, LogContext};
use corelink_metrics::BridgeMetrics;
use corelink_msg::{BridgeError, Frame, FrameReader, FrameWriter};
use corelink_resilience::{Backoff, ReconnectPolicy};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::connection::{CloseReason, Connection, ConnectionState};
use crate::connector::{Connector, TcpConnector};

/// Receives inbound traffic and connection-loss notices.
///
/// Callbacks run on the channel's supervisor task and must not block.
pub trait ChannelObserver: Send + Sync {
    /// A new connection is up.
    fn on_open(&self) {}

    /// A response or event arrived. Heartbeat frames are not forwarded.
    fn on_frame(&self, frame: &Frame);

    /// The connection dropped. Fires once per connection, after the outbound
    /// slot has been cleared.
    fn on_close(&self, reason: &CloseReason);
}

/// Timing parameters of the channel.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl From<&AppConfig> for ChannelSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            connect_timeout: config.core.connect_timeout,
            heartbeat_interval: config.heartbeat.interval,
            heartbeat_timeout: config.heartbeat.timeout,
            reconnect: ReconnectPolicy::from(&config.reconnect),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Builder for the supervised connection.
pub struct LivenessChannel<C: Connector = TcpConnector> {
    settings: ChannelSettings,
    connector: C,
    observers: Vec<Arc<dyn ChannelObserver>>,
    metrics: Option<BridgeMetrics>,
}

impl LivenessChannel<TcpConnector> {
    /// Channel dialling plain TCP.
    pub fn tcp(settings: ChannelSettings) -> Self {
        let connector = TcpConnector::new(settings.connect_timeout);
        Self::with_connector(settings, connector)
    }
}

impl<C: Connector> LivenessChannel<C> {
    pub fn with_connector(settings: ChannelSettings, connector: C) -> Self {
        Self {
            settings,
            connector,
            observers: Vec::new(),
            metrics: None,
        }
    }

    /// Register an observer. Observers are notified in registration order.
    pub fn observe(mut self, observer: Arc<dyn ChannelObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_metrics(mut self, metrics: Option<BridgeMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Start dialling `endpoint` and keep the connection alive until
    /// [`ChannelHandle::shutdown`] is called.
    pub fn connect(self, endpoint: SocketAddr) -> ChannelHandle {
        let (state_tx, _) = watch::channel(Connection::new(endpoint, ConnectionState::Disconnected));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            outbound: Mutex::new(None),
            state: state_tx,
            shutdown: shutdown_tx,
            task: Mutex::new(None),
        });

        let supervisor = Supervisor {
            endpoint,
            endpoint_label: endpoint.to_string(),
            settings: self.settings,
            connector: self.connector,
            observers: self.observers,
            metrics: self.metrics,
            shared: shared.clone(),
        };
        let task = tokio::spawn(supervisor.run(shutdown_rx));
        *shared.task.lock() = Some(task);

        ChannelHandle { shared }
    }
}

struct Shared {
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    state: watch::Sender<Connection>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|connection| {
            if connection.state == state {
                return false;
            }
            // Fresh connection value per transition: no heartbeat history carries over.
            *connection = Connection::new(connection.endpoint, state);
            true
        });
    }

    fn touch_heartbeat(&self) {
        self.state
            .send_modify(|connection| connection.last_heartbeat = Some(Utc::now()));
    }
}

/// Cloneable handle to a running channel.
#[derive(Clone)]
pub struct ChannelHandle {
    shared: Arc<Shared>,
}

impl ChannelHandle {
    /// Queue a frame on the current connection.
    ///
    /// Fails with [`BridgeError::ConnectionLost`] when no connection is up.
    pub fn send(&self, frame: Frame) -> Result<(), BridgeError> {
        let slot = self.shared.outbound.lock();
        match slot.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| BridgeError::ConnectionLost),
            None => Err(BridgeError::ConnectionLost),
        }
    }

    /// Current connection snapshot.
    pub fn connection(&self) -> Connection {
        self.shared.state.borrow().clone()
    }

    /// Receiver for connection snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Connection> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().is_connected()
    }

    /// Wait until the channel reports `Connected`.
    pub async fn wait_connected(&self, within: Duration) -> Result<(), BridgeError> {
        let mut rx = self.subscribe();
        let waited = tokio::time::timeout(within, rx.wait_for(Connection::is_connected)).await;
        match waited {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(BridgeError::ConnectionLost),
            Err(_) => Err(BridgeError::Timeout {
                command: "connect".to_owned(),
                after: within,
            }),
        }
    }

    /// Stop the supervisor permanently and wait for it to exit.
    pub async fn shutdown(&self) {
        let _ = self.shared.shutdown.send(true);
        let task = self.shared.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "liveness channel task ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("connection", &*self.shared.state.borrow())
            .finish_non_exhaustive()
    }
}

struct Supervisor<C: Connector> {
    endpoint: SocketAddr,
    endpoint_label: String,
    settings: ChannelSettings,
    connector: C,
    observers: Vec<Arc<dyn ChannelObserver>>,
    metrics: Option<BridgeMetrics>,
    shared: Arc<Shared>,
}

impl<C: Connector> Supervisor<C> {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = self.settings.reconnect.start();
        let mut sessions = 0u64;

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.shared.set_state(ConnectionState::Connecting);

            let dialled = tokio::select! {
                result = self.connector.connect(self.endpoint) => result,
                _ = shutdown.changed() => break,
            };

            let delay = match dialled {
                Ok(stream) => {
                    sessions += 1;
                    if sessions > 1 {
                        if let Some(metrics) = &self.metrics {
                            metrics.inc_reconnect();
                        }
                    }
                    let reason = self.session(stream, &mut shutdown, &mut backoff).await;
                    for observer in &self.observers {
                        observer.on_close(&reason);
                    }
                    if reason.is_shutdown() {
                        break;
                    }
                    // Still growing if the session never saw a pong.
                    backoff.next_delay()
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(
                        endpoint = %self.endpoint,
                        attempt = backoff.attempts(),
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "failed to reach core process"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.shared.outbound.lock().take();
        self.shared.set_state(ConnectionState::Disconnected);
        info!(endpoint = %self.endpoint, "liveness channel stopped");
    }

    /// Serve one connection until it closes. The backoff restarts only once
    /// the core has answered a heartbeat.
    async fn session(
        &self,
        stream: C::Stream,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut Backoff,
    ) -> CloseReason {
        let ctx = LogContext::new().with_endpoint(&self.endpoint_label);
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read_half);
        let mut writer = FrameWriter::new(write_half);

        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.shared.outbound.lock() = Some(tx);
        self.shared.set_state(ConnectionState::Connected);
        link_info!(context = ctx.clone(), "connected to core process");
        for observer in &self.observers {
            observer.on_open();
        }

        let mut ticker = interval(self.settings.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut seq = 0u64;
        // Send time of the oldest probe not yet acknowledged.
        let mut awaiting_since: Option<Instant> = None;

        let reason = loop {
            let probe_deadline = awaiting_since.map(|since| since + self.settings.heartbeat_timeout);
            tokio::select! {
                biased;
                _ = shutdown.changed() => break CloseReason::Shutdown,
                _ = async {
                    match probe_deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_heartbeat_timeout();
                    }
                    link_warn!(context = ctx.clone(), "liveness probe unanswered; declaring connection dead");
                    break CloseReason::HeartbeatTimeout;
                }
                inbound = reader.next_frame() => match inbound {
                    Ok(Some(Frame::Pong { seq: acked })) => {
                        debug!(seq = acked, "liveness probe acknowledged");
                        awaiting_since = None;
                        backoff.reset();
                        self.shared.touch_heartbeat();
                    }
                    Ok(Some(Frame::Ping { seq: probe })) => {
                        if let Err(err) = writer.send(&Frame::Pong { seq: probe }).await {
                            break CloseReason::Io(err.to_string());
                        }
                    }
                    Ok(Some(frame)) => {
                        for observer in &self.observers {
                            observer.on_frame(&frame);
                        }
                    }
                    Ok(None) => break CloseReason::RemoteClosed,
                    Err(err) if err.is_recoverable() => {
                        link_warn!(context = ctx.clone(), "dropping unreadable frame: {}", err);
                    }
                    Err(err) => break CloseReason::Io(err.to_string()),
                },
                Some(frame) = rx.recv() => {
                    if let Err(err) = writer.send(&frame).await {
                        break CloseReason::Io(err.to_string());
                    }
                }
                _ = ticker.tick() => {
                    seq += 1;
                    if let Err(err) = writer.send(&Frame::Ping { seq }).await {
                        break CloseReason::Io(err.to_string());
                    }
                    awaiting_since.get_or_insert_with(Instant::now);
                }
            }
        };

        // Clear the slot first so no send can race into a dead connection.
        self.shared.outbound.lock().take();
        self.shared.set_state(ConnectionState::Disconnected);
        let _ = writer.close().await;
        link_debug!(context = ctx, "connection closed: {}", reason);
        reason
    }
}
