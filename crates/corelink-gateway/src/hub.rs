//! ---
//! cl_section: "05-command-gateway"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Topic fan-out hub for events pushed by the core."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
//! Topic fan-out for events pushed by the core.
//!
//! Progress topics keep only their latest payload, so a slow subscriber sees
//! the newest value rather than a backlog. Update notices are edges and reach
//! every live subscriber in order.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use corelink_channel::{ChannelObserver, CloseReason};
use corelink_logging::{link_debug, link_warn, LogContext};
use corelink_metrics::BridgeMetrics;
use corelink_msg::{Delivery, EventPayload, Frame, Topic};
use serde_json::Value;
use strum::IntoEnumIterator;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

const EDGE_CAPACITY: usize = 64;
const NOTICE_CAPACITY: usize = 16;

/// Published when the channel to the core drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionNotice {
    pub reason: CloseReason,
    pub at: DateTime<Utc>,
}

enum Slot {
    Latest(watch::Sender<Option<Value>>),
    Edge(broadcast::Sender<Value>),
}

struct HubInner {
    slots: HashMap<Topic, Slot>,
    notices: broadcast::Sender<ConnectionNotice>,
    metrics: Option<BridgeMetrics>,
}

/// Fan-out hub keyed by topic.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::with_metrics(None)
    }

    pub fn with_metrics(metrics: Option<BridgeMetrics>) -> Self {
        let slots = Topic::iter()
            .filter(|topic| *topic != Topic::Unknown)
            .map(|topic| {
                let slot = match topic.delivery() {
                    Delivery::LatestValue => Slot::Latest(watch::channel(None).0),
                    Delivery::Edge => Slot::Edge(broadcast::channel(EDGE_CAPACITY).0),
                };
                (topic, slot)
            })
            .collect();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            inner: Arc::new(HubInner {
                slots,
                notices,
                metrics,
            }),
        }
    }

    /// Deliver a raw payload to the subscribers of `topic`.
    pub fn publish(&self, topic: Topic, payload: Value) {
        let Some(slot) = self.inner.slots.get(&topic) else {
            link_debug!(
                context = LogContext::new().with_topic(topic.as_ref()),
                "ignoring event for unknown topic"
            );
            return;
        };
        if let Some(metrics) = &self.inner.metrics {
            metrics.inc_event(topic.as_ref());
        }
        match slot {
            Slot::Latest(tx) => {
                tx.send_replace(Some(payload));
            }
            // No receivers is fine: edges are not retained.
            Slot::Edge(tx) => {
                let _ = tx.send(payload);
            }
        }
    }

    /// Typed convenience over [`EventHub::publish`].
    pub fn emit<P: EventPayload>(&self, payload: &P) -> corelink_msg::Result<()> {
        self.publish(P::TOPIC, serde_json::to_value(payload)?);
        Ok(())
    }

    /// Subscribe to one topic. Latest-value topics start from the next
    /// published value; the current one is available via
    /// [`Subscription::latest`].
    pub fn subscribe<P: EventPayload>(&self) -> Subscription<P> {
        let source = match self.inner.slots.get(&P::TOPIC) {
            Some(Slot::Latest(tx)) => Source::Latest(tx.subscribe()),
            Some(Slot::Edge(tx)) => Source::Edge(tx.subscribe()),
            None => Source::Closed,
        };
        Subscription {
            source,
            _payload: PhantomData,
        }
    }

    /// Run `handler` for every payload of `P::TOPIC` until the token is
    /// dropped or unsubscribed.
    pub fn on<P, F>(&self, handler: F) -> SubscriptionToken
    where
        P: EventPayload,
        F: Fn(P) + Send + 'static,
    {
        let mut subscription = self.subscribe::<P>();
        let task = tokio::spawn(async move {
            while let Some(payload) = subscription.recv().await {
                handler(payload);
            }
        });
        SubscriptionToken { task: Some(task) }
    }

    /// Receiver for connection-loss notices.
    pub fn connection_notices(&self) -> broadcast::Receiver<ConnectionNotice> {
        self.inner.notices.subscribe()
    }

    /// Announce a connection loss to every notice receiver.
    pub fn notify_connection_lost(&self, reason: CloseReason) {
        let _ = self.inner.notices.send(ConnectionNotice {
            reason,
            at: Utc::now(),
        });
    }
}

impl ChannelObserver for EventHub {
    fn on_frame(&self, frame: &Frame) {
        if let Frame::Event { topic, payload } = frame {
            self.publish(*topic, payload.clone());
        }
    }

    fn on_close(&self, reason: &CloseReason) {
        self.notify_connection_lost(reason.clone());
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("topics", &self.inner.slots.len())
            .finish_non_exhaustive()
    }
}

enum Source {
    Latest(watch::Receiver<Option<Value>>),
    Edge(broadcast::Receiver<Value>),
    Closed,
}

/// Typed receiver for one topic.
pub struct Subscription<P: EventPayload> {
    source: Source,
    _payload: PhantomData<fn() -> P>,
}

impl<P: EventPayload> Subscription<P> {
    /// Next payload, or `None` once the hub is gone. Payloads that do not
    /// decode as `P` are logged and skipped.
    pub async fn recv(&mut self) -> Option<P> {
        let topic = P::TOPIC;
        loop {
            let value = match &mut self.source {
                Source::Latest(rx) => {
                    rx.changed().await.ok()?;
                    let current = rx.borrow_and_update().clone();
                    match current {
                        Some(value) => value,
                        None => continue,
                    }
                }
                Source::Edge(rx) => match rx.recv().await {
                    Ok(value) => value,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        link_warn!(
                            context = LogContext::new().with_topic(topic.as_ref()),
                            "subscriber lagged; {} notices skipped",
                            skipped
                        );
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                Source::Closed => return None,
            };
            match decode::<P>(value) {
                Ok(payload) => return Some(payload),
                Err(err) => {
                    link_warn!(
                        context = LogContext::new().with_topic(topic.as_ref()),
                        "dropping malformed event payload: {}",
                        err
                    );
                }
            }
        }
    }

    /// Most recent payload of a latest-value topic. Always `None` for edges.
    pub fn latest(&self) -> Option<P> {
        match &self.source {
            Source::Latest(rx) => rx
                .borrow()
                .clone()
                .and_then(|value| decode(value).ok()),
            _ => None,
        }
    }
}

/// Events without a payload arrive as `null`; they decode like an empty object.
fn decode<P: EventPayload>(value: Value) -> serde_json::Result<P> {
    match value {
        Value::Null => serde_json::from_value(Value::Object(Default::default())),
        value => serde_json::from_value(value),
    }
}

/// Keeps a handler registered by [`EventHub::on`] alive.
#[must_use = "dropping the token unsubscribes the handler"]
#[derive(Debug)]
pub struct SubscriptionToken {
    task: Option<JoinHandle<()>>,
}

impl SubscriptionToken {
    /// Stop the handler. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SubscriptionToken {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
