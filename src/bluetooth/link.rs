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

//! Connection lifecycle for the single peripheral link.
//!
//! The link moves `Idle -> Connecting -> Connected -> Idle`, or drops back to
//! `Idle` from `Connecting` when both attempts fail. All transitions and
//! event publishes happen under one lock, so subscribers observe them in the
//! order they happened.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::decoder::{FrameDecoder, TelemetryRecord};
use super::transport::{Connection, PeripheralAddress, TelemetryStream, Transport, TransportError};
use crate::events::{EventPublisher, LinkEvent};

/// Automatic retries after the first failed attempt.
pub const MAX_CONNECT_RETRIES: u32 = 1;

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Idle => "Not connected",
            LinkState::Connecting => "Connecting...",
            LinkState::Connected => "Connected",
        }
    }
}

/// Tunables for the link.
#[derive(Debug, Clone, Default)]
pub struct LinkConfig {
    /// Upper bound on a single open attempt. `None` leaves it to the transport.
    pub connect_timeout: Option<Duration>,
}

struct LinkInner {
    state: LinkState,
    /// Bumped on every teardown; workers from an older generation are stale.
    generation: u64,
    retries: u32,
    address: Option<PeripheralAddress>,
    device_name: Option<String>,
    connect_task: Option<JoinHandle<()>>,
    read_task: Option<JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<LinkInner>,
    transport: Arc<dyn Transport>,
    events: EventPublisher,
    config: LinkConfig,
}

/// What the connect worker does after an attempt resolves.
enum AttemptOutcome {
    Retry,
    Done,
}

/// Owns the link state and its connect/read workers.
#[derive(Clone)]
pub struct LinkManager {
    shared: Arc<Shared>,
}

impl LinkManager {
    /// Create an idle link.
    pub fn new(transport: Arc<dyn Transport>, config: LinkConfig, events: EventPublisher) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(LinkInner {
                    state: LinkState::Idle,
                    generation: 0,
                    retries: 0,
                    address: None,
                    device_name: None,
                    connect_task: None,
                    read_task: None,
                }),
                transport,
                events,
                config,
            }),
        }
    }

    /// Start connecting to `address`.
    ///
    /// Any in-flight attempt or active connection is torn down first. The
    /// attempt itself runs on a background task. Must be called inside a
    /// Tokio runtime.
    pub fn connect(&self, address: PeripheralAddress) {
        let mut inner = self.shared.inner.lock();
        info!("Connecting to {}", address);

        self.shared.teardown(&mut inner);
        inner.retries = 0;
        inner.address = Some(address.clone());
        self.shared.set_state(&mut inner, LinkState::Connecting);

        let generation = inner.generation;
        let shared = self.shared.clone();
        inner.connect_task = Some(tokio::spawn(async move {
            run_connect(shared, address, generation).await;
        }));
    }

    /// Cancel any attempt, close any connection and return to idle.
    ///
    /// Calling this while already idle does nothing.
    pub fn stop(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.state != LinkState::Idle {
            info!("Stopping link");
        }
        self.shared.teardown(&mut inner);
        inner.address = None;
    }

    pub fn state(&self) -> LinkState {
        self.shared.inner.lock().state
    }

    /// Name of the connected peripheral.
    pub fn device_name(&self) -> Option<String> {
        self.shared.inner.lock().device_name.clone()
    }

    /// Address of the current or most recent connect request.
    pub fn address(&self) -> Option<PeripheralAddress> {
        self.shared.inner.lock().address.clone()
    }

    /// Re-publish the current state for late subscribers.
    pub fn announce(&self) {
        let inner = self.shared.inner.lock();
        self.shared.events.publish(LinkEvent::StateChanged {
            state: inner.state,
            device_name: inner.device_name.clone(),
        });
    }
}

impl Shared {
    fn set_state(&self, inner: &mut LinkInner, state: LinkState) {
        debug!("Link state {:?} -> {:?}", inner.state, state);
        if state != LinkState::Connected {
            inner.device_name = None;
        }
        inner.state = state;
        self.events.publish(LinkEvent::StateChanged {
            state,
            device_name: inner.device_name.clone(),
        });
    }

    /// Invalidate workers and release the transport.
    fn teardown(&self, inner: &mut LinkInner) {
        inner.generation += 1;
        if let Some(task) = inner.connect_task.take() {
            debug!("Cancelling connect attempt");
            task.abort();
        }
        if let Some(task) = inner.read_task.take() {
            debug!("Closing active connection");
            task.abort();
        }
        if inner.state != LinkState::Idle {
            self.set_state(inner, LinkState::Idle);
        }
    }

    async fn open(
        &self,
        address: &PeripheralAddress,
        attempt: u32,
    ) -> Result<Connection, TransportError> {
        match self.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, self.transport.open(address, attempt))
                .await
                .map_err(|_| TransportError::Timeout(address.to_string()))?,
            None => self.transport.open(address, attempt).await,
        }
    }

    fn finish_attempt(
        self: &Arc<Self>,
        address: &PeripheralAddress,
        generation: u64,
        result: Result<Connection, TransportError>,
    ) -> AttemptOutcome {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            // Superseded; a successful connection is dropped and closed here.
            debug!("Discarding stale connect attempt to {}", address);
            return AttemptOutcome::Done;
        }

        match result {
            Ok(connection) => {
                inner.connect_task = None;
                let name = connection
                    .device_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| address.to_string());
                info!("Connected to {}", name);

                inner.device_name = Some(name);
                self.set_state(&mut inner, LinkState::Connected);

                let shared = self.clone();
                let stream = connection.into_stream();
                inner.read_task = Some(tokio::spawn(async move {
                    run_reader(shared, stream, generation).await;
                }));
                AttemptOutcome::Done
            }
            Err(e) if inner.retries < MAX_CONNECT_RETRIES => {
                inner.retries += 1;
                warn!("Connection to {} failed ({}), retrying", address, e);
                AttemptOutcome::Retry
            }
            Err(e) => {
                error!("Unable to connect to {}: {}", address, e);
                inner.connect_task = None;
                self.set_state(&mut inner, LinkState::Idle);
                self.events.publish(LinkEvent::ConnectionFailed);
                AttemptOutcome::Done
            }
        }
    }

    /// Handle one read result. Returns `false` once the reader should stop.
    fn handle_read(
        &self,
        generation: u64,
        result: std::io::Result<Option<TelemetryRecord>>,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }

        match result {
            Ok(Some(record)) => {
                debug_assert_eq!(inner.state, LinkState::Connected);
                self.events.publish(LinkEvent::Telemetry(record));
                true
            }
            Ok(None) => {
                info!("Connection closed by remote");
                self.connection_lost(&mut inner);
                false
            }
            Err(e) => {
                error!("Read error: {}", e);
                self.connection_lost(&mut inner);
                false
            }
        }
    }

    fn connection_lost(&self, inner: &mut LinkInner) {
        inner.generation += 1;
        inner.read_task = None;
        self.set_state(inner, LinkState::Idle);
        self.events.publish(LinkEvent::ConnectionLost);
    }
}

async fn run_connect(shared: Arc<Shared>, address: PeripheralAddress, generation: u64) {
    let mut attempt = 0;
    loop {
        let result = shared.open(&address, attempt).await;
        match shared.finish_attempt(&address, generation, result) {
            AttemptOutcome::Retry => attempt += 1,
            AttemptOutcome::Done => return,
        }
    }
}

async fn run_reader(shared: Arc<Shared>, stream: TelemetryStream, generation: u64) {
    debug!("Reader started");
    let mut decoder = FrameDecoder::new(BufReader::new(stream));
    loop {
        let result = decoder.next_record().await;
        if !shared.handle_read(generation, result) {
            break;
        }
    }
    debug!("Reader stopped");
}
