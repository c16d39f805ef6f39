//! Scripted in-memory transport for link tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, DuplexStream, ReadBuf};
use tokio::sync::mpsc::UnboundedReceiver;

use battery_monitor::bluetooth::{Connection, PeripheralAddress, Transport, TransportError};
use battery_monitor::events::LinkEvent;

/// How long to wait for an expected event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to watch for unexpected events.
pub const QUIET_PERIOD: Duration = Duration::from_millis(150);

/// Outcome of one `open` call.
pub enum Step {
    /// Fail immediately.
    Fail,
    /// Never complete until cancelled.
    Hang,
    /// Succeed with the given connection.
    Connect(Connection),
}

impl Step {
    /// Connected step plus the peripheral side to write telemetry into.
    pub fn connect(name: &str) -> (Self, DuplexStream) {
        let (client, peripheral) = tokio::io::duplex(1024);
        (
            Step::Connect(Connection::new(client).with_device_name(name)),
            peripheral,
        )
    }

    /// Connected step whose stream yields `data` and then a read error.
    pub fn broken(name: &str, data: &[u8]) -> Self {
        let reader = FailingReader {
            data: data.to_vec(),
            sent: false,
        };
        Step::Connect(Connection::new(reader).with_device_name(name))
    }
}

/// Reader that returns its data once, then fails.
struct FailingReader {
    data: Vec<u8>,
    sent: bool,
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.sent {
            self.sent = true;
            let data = std::mem::take(&mut self.data);
            buf.put_slice(&data);
            return Poll::Ready(Ok(()));
        }
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "link dropped",
        )))
    }
}

struct CancelGuard(Arc<AtomicUsize>);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Transport that replays scripted outcomes per address.
#[derive(Default)]
pub struct ScriptedTransport {
    steps: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<(String, u32)>>,
    cancelled: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, address: &str, step: Step) {
        self.steps
            .lock()
            .entry(address.to_string())
            .or_default()
            .push_back(step);
    }

    /// `(address, attempt)` for every `open` call so far.
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().clone()
    }

    /// Number of hanging attempts that were dropped.
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(
        &self,
        address: &PeripheralAddress,
        attempt: u32,
    ) -> Result<Connection, TransportError> {
        self.calls.lock().push((address.to_string(), attempt));
        let step = self
            .steps
            .lock()
            .get_mut(address.as_str())
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Step::Fail);

        match step {
            Step::Fail => Err(TransportError::ConnectFailed {
                address: address.to_string(),
                reason: "scripted failure".to_string(),
            }),
            Step::Hang => {
                let _guard = CancelGuard(self.cancelled.clone());
                std::future::pending::<()>().await;
                unreachable!()
            }
            Step::Connect(connection) => Ok(connection),
        }
    }
}

/// Wait for the next event or panic.
pub async fn next_event(rx: &mut UnboundedReceiver<LinkEvent>) -> LinkEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Assert that no event arrives for a short while.
pub async fn assert_quiet(rx: &mut UnboundedReceiver<LinkEvent>) {
    if let Ok(Some(event)) = tokio::time::timeout(QUIET_PERIOD, rx.recv()).await {
        panic!("unexpected event: {:?}", event);
    }
}
