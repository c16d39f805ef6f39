// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Event dispatch to subscribers.
//!
//! The link publishes onto a single ordered queue; one delivery task drains
//! it and hands every event to each registered subscriber in turn.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::bluetooth::{
    LinkConfig, LinkManager, LinkState, PeripheralAddress, TelemetryRecord, Transport,
};

/// Events delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    /// The link changed state. The device name is set once connected.
    StateChanged {
        state: LinkState,
        device_name: Option<String>,
    },
    /// A decoded reading, in stream order.
    Telemetry(TelemetryRecord),
    /// Both connection attempts failed.
    ConnectionFailed,
    /// An established connection dropped.
    ConnectionLost,
}

/// Receives link events.
///
/// Called from the delivery task; implementations should return quickly.
pub trait Subscriber: Send + Sync {
    fn on_event(&self, event: &LinkEvent);

    /// A closed subscriber is dropped from the registry.
    fn is_closed(&self) -> bool {
        false
    }
}

impl<F> Subscriber for F
where
    F: Fn(&LinkEvent) + Send + Sync,
{
    fn on_event(&self, event: &LinkEvent) {
        self(event)
    }
}

/// Forwards events into a channel.
struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl Subscriber for ChannelSubscriber {
    fn on_event(&self, event: &LinkEvent) {
        if self.tx.send(event.clone()).is_err() {
            trace!("Subscriber channel closed, dropping event");
        }
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Sending side of the event queue.
#[derive(Clone)]
pub struct EventPublisher {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>>,
}

impl EventPublisher {
    pub fn new(tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Queue an event. Never blocks.
    pub fn publish(&self, event: LinkEvent) {
        if let Some(tx) = self.tx.lock().as_ref() {
            if tx.send(event).is_err() {
                trace!("Event queue closed, dropping event");
            }
        }
    }

    /// Stop accepting events; the delivery task exits once drained.
    pub fn close(&self) {
        self.tx.lock().take();
    }
}

#[derive(Default)]
struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, Arc<dyn Subscriber>)>>,
}

impl SubscriberRegistry {
    fn add(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, subscriber));
        id
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    fn snapshot(&self) -> Vec<Arc<dyn Subscriber>> {
        self.subscribers
            .read()
            .iter()
            .map(|(_, subscriber)| subscriber.clone())
            .collect()
    }

    fn prune_closed(&self) -> usize {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(_, subscriber)| !subscriber.is_closed());
        before - subscribers.len()
    }

    fn len(&self) -> usize {
        self.subscribers.read().len()
    }
}

async fn deliver(mut rx: mpsc::UnboundedReceiver<LinkEvent>, registry: Arc<SubscriberRegistry>) {
    while let Some(event) = rx.recv().await {
        trace!("Delivering {:?}", event);
        // Snapshot so subscribers may (un)subscribe from inside a callback.
        let mut saw_closed = false;
        for subscriber in registry.snapshot() {
            subscriber.on_event(&event);
            saw_closed |= subscriber.is_closed();
        }
        if saw_closed {
            let removed = registry.prune_closed();
            debug!("Removed {} closed subscriber(s)", removed);
        }
    }
    debug!("Event delivery stopped");
}

/// Single integration point between the link and its consumers.
pub struct TelemetryDispatcher {
    link: LinkManager,
    publisher: EventPublisher,
    registry: Arc<SubscriberRegistry>,
    delivery: JoinHandle<()>,
}

impl TelemetryDispatcher {
    /// Create the dispatcher and its delivery task.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, config: LinkConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let publisher = EventPublisher::new(tx);
        let registry = Arc::new(SubscriberRegistry::default());
        let delivery = tokio::spawn(deliver(rx, registry.clone()));
        let link = LinkManager::new(transport, config, publisher.clone());

        Self {
            link,
            publisher,
            registry,
            delivery,
        }
    }

    /// Register a subscriber for all future events.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = self.registry.add(subscriber);
        debug!("Subscriber {:?} added", id);
        id
    }

    /// Register a channel-backed subscriber.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(Arc::new(ChannelSubscriber { tx }));
        (id, rx)
    }

    /// Remove a subscriber. Connections are unaffected.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.registry.remove(id);
        if removed {
            debug!("Subscriber {:?} removed", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    pub fn connect(&self, address: PeripheralAddress) {
        self.link.connect(address);
    }

    pub fn stop(&self) {
        self.link.stop();
    }

    pub fn state(&self) -> LinkState {
        self.link.state()
    }

    pub fn device_name(&self) -> Option<String> {
        self.link.device_name()
    }

    /// Replay the current state and device name to every subscriber.
    pub fn send_update(&self) {
        self.link.announce();
    }

    /// Stop the link and wait until queued events have been delivered.
    pub async fn shutdown(self) {
        info!("Shutting down telemetry dispatcher");
        self.link.stop();
        self.publisher.close();
        let _ = self.delivery.await;
    }
}
