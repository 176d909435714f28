//! ---
//! cl_section: "08-testing"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Scripted loopback core process for integration tests."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
//! A scripted stand-in for the core process.
//!
//! [`MockCore`] listens on a loopback TCP port and speaks the same
//! newline-delimited JSON protocol as the real core. Each command is answered
//! by a [`Script`] registered for its name, and tests can push events, cut
//! connections, or stop answering liveness probes at any time.

mod script;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use corelink_msg::{CommandName, EventPayload, Frame, FrameReader, FrameWriter};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use script::{Action, Script};

type Handler = Arc<dyn Fn(&Value) -> Script + Send + Sync>;

/// Request observed by the mock core.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedRequest {
    pub id: u64,
    pub command: CommandName,
    pub payload: Value,
}

struct CoreState {
    handlers: Mutex<HashMap<CommandName, Handler>>,
    received: Mutex<Vec<ReceivedRequest>>,
    clients: Mutex<Vec<mpsc::UnboundedSender<Frame>>>,
    answer_pings: AtomicBool,
    accepted: AtomicUsize,
    pings: AtomicUsize,
    kick: broadcast::Sender<()>,
    accepted_tx: watch::Sender<usize>,
}

/// Loopback core process driven by scripts.
pub struct MockCore {
    addr: SocketAddr,
    state: Arc<CoreState>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MockCore {
    /// Listen on an ephemeral loopback port.
    pub async fn start() -> Result<Self> {
        Self::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await
    }

    /// Listen on a specific address.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind mock core on {addr}"))?;
        let addr = listener.local_addr()?;
        let (kick, _) = broadcast::channel(4);
        let (accepted_tx, _) = watch::channel(0);
        let state = Arc::new(CoreState {
            handlers: Mutex::new(HashMap::new()),
            received: Mutex::new(Vec::new()),
            clients: Mutex::new(Vec::new()),
            answer_pings: AtomicBool::new(true),
            accepted: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            kick,
            accepted_tx,
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, state.clone(), shutdown_rx));
        Ok(Self {
            addr,
            state,
            shutdown,
            task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Answer every `command` with the script produced by `handler`.
    pub fn on<F>(&self, command: CommandName, handler: F)
    where
        F: Fn(&Value) -> Script + Send + Sync + 'static,
    {
        self.state.handlers.lock().insert(command, Arc::new(handler));
    }

    /// Answer every `command` with a clone of `script`.
    pub fn reply(&self, command: CommandName, script: Script) {
        self.on(command, move |_| script.clone());
    }

    /// Push an event to every connected client.
    pub fn publish<P: EventPayload>(&self, payload: P) -> Result<()> {
        let frame = Frame::event(&payload)?;
        self.broadcast(frame);
        Ok(())
    }

    /// Push a raw frame to every connected client.
    pub fn broadcast(&self, frame: Frame) {
        self.state
            .clients
            .lock()
            .retain(|client| client.send(frame.clone()).is_ok());
    }

    /// Close every open client connection. The listener keeps accepting.
    pub fn drop_connections(&self) {
        let _ = self.state.kick.send(());
    }

    /// Stop (or resume) acknowledging liveness probes.
    pub fn set_answer_pings(&self, answer: bool) {
        self.state.answer_pings.store(answer, Ordering::SeqCst);
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Liveness probes received so far.
    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` connections have been accepted.
    pub async fn wait_for_accepted(&self, count: usize, within: Duration) -> Result<()> {
        let mut rx = self.state.accepted_tx.subscribe();
        tokio::time::timeout(within, rx.wait_for(|accepted| *accepted >= count))
            .await
            .with_context(|| format!("expected {count} connections within {within:?}"))?
            .context("mock core stopped")?;
        Ok(())
    }

    /// Requests received so far, in arrival order.
    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.state.received.lock().clone()
    }

    /// Requests received for one command.
    pub fn received_for(&self, command: CommandName) -> Vec<ReceivedRequest> {
        self.state
            .received
            .lock()
            .iter()
            .filter(|request| request.command == command)
            .cloned()
            .collect()
    }

    /// Stop listening and close every connection.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.state.kick.send(());
        let _ = self.task.await;
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<CoreState>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let count = state.accepted.fetch_add(1, Ordering::SeqCst) + 1;
                    state.accepted_tx.send_replace(count);
                    debug!(%peer, count, "mock core accepted connection");
                    tokio::spawn(serve_connection(stream, state.clone()));
                }
                Err(err) => {
                    warn!(error = %err, "mock core accept failed");
                    break;
                }
            },
        }
    }
}

async fn serve_connection(stream: TcpStream, state: Arc<CoreState>) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let mut writer = FrameWriter::new(write_half);
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let (close_tx, mut close_rx) = mpsc::unbounded_channel::<()>();
    let mut kick = state.kick.subscribe();
    state.clients.lock().push(tx.clone());

    loop {
        tokio::select! {
            _ = kick.recv() => break,
            _ = close_rx.recv() => {
                // Flush what the script queued before the disconnect step.
                while let Ok(frame) = rx.try_recv() {
                    let _ = writer.send(&frame).await;
                }
                break;
            }
            Some(frame) = rx.recv() => {
                if writer.send(&frame).await.is_err() {
                    break;
                }
            }
            inbound = reader.next_frame() => match inbound {
                Ok(Some(Frame::Ping { seq })) => {
                    state.pings.fetch_add(1, Ordering::SeqCst);
                    if state.answer_pings.load(Ordering::SeqCst) {
                        let _ = tx.send(Frame::Pong { seq });
                    }
                }
                Ok(Some(Frame::Request { id, command, payload })) => {
                    state.received.lock().push(ReceivedRequest {
                        id,
                        command,
                        payload: payload.clone(),
                    });
                    let handler = state.handlers.lock().get(&command).cloned();
                    let script = match handler {
                        Some(handler) => handler(&payload),
                        None => Script::fail("unknownCommand", command.as_ref()),
                    };
                    tokio::spawn(run_script(id, script, tx.clone(), close_tx.clone()));
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(err) if err.is_recoverable() => {}
                Err(_) => break,
            },
        }
    }
    let _ = writer.close().await;
}

async fn run_script(
    id: u64,
    script: Script,
    tx: mpsc::UnboundedSender<Frame>,
    close: mpsc::UnboundedSender<()>,
) {
    for action in script.actions {
        let sent = match action {
            Action::Send(frame) => tx.send(frame).is_ok(),
            Action::Pause(duration) => {
                tokio::time::sleep(duration).await;
                true
            }
            Action::Respond(result) => tx
                .send(Frame::Response {
                    id,
                    result: Some(result),
                    error: None,
                })
                .is_ok(),
            Action::Fail(fault) => tx.send(Frame::failure(id, fault)).is_ok(),
            Action::Disconnect => {
                let _ = close.send(());
                false
            }
        };
        if !sent {
            break;
        }
    }
}
