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

//! Byte-stream transport to a peripheral.
//!
//! The link state machine only depends on [`Transport`]; the RFCOMM client
//! below is the production implementation.

use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::{Adapter, Address};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::AsyncRead;
use tracing::{debug, info};

/// Default RFCOMM channel for the serial port profile.
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// Identifier of a paired peripheral, e.g. `00:06:66:AA:BB:CC`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralAddress(String);

impl PeripheralAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeripheralAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(TransportError::InvalidAddress(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Errors raised while opening or reading a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid peripheral address: {0:?}")]
    InvalidAddress(String),

    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("connection to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("connection to {0} timed out")]
    Timeout(String),
}

/// Readable half of an open link.
pub type TelemetryStream = Box<dyn AsyncRead + Send + Unpin>;

/// An open connection. Dropping it closes the underlying socket.
pub struct Connection {
    device_name: Option<String>,
    stream: TelemetryStream,
}

impl Connection {
    /// Wrap an open byte stream.
    pub fn new(stream: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            device_name: None,
            stream: Box::new(stream),
        }
    }

    /// Attach the name the peripheral reported.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// Take the byte stream for reading.
    pub fn into_stream(self) -> TelemetryStream {
        self.stream
    }

    /// Close the connection and release the socket.
    pub fn close(self) {
        drop(self);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("device_name", &self.device_name)
            .finish_non_exhaustive()
    }
}

/// Opens byte streams to peripherals.
///
/// `attempt` counts from 0 within one connect request, so implementations
/// can vary their parameters on the retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        address: &PeripheralAddress,
        attempt: u32,
    ) -> Result<Connection, TransportError>;
}

/// RFCOMM client over BlueZ.
pub struct RfcommTransport {
    adapter: Option<Adapter>,
    channel: u8,
    fallback_channel: u8,
}

impl RfcommTransport {
    /// Create a transport.
    ///
    /// With an adapter the device alias is looked up for display.
    pub fn new(adapter: Option<Adapter>, channel: u8, fallback_channel: u8) -> Self {
        Self {
            adapter,
            channel,
            fallback_channel,
        }
    }

    /// RFCOMM channel used for a given attempt.
    pub fn channel_for_attempt(&self, attempt: u32) -> u8 {
        if attempt == 0 {
            self.channel
        } else {
            self.fallback_channel
        }
    }

    async fn device_alias(&self, address: Address) -> Option<String> {
        let adapter = self.adapter.as_ref()?;
        let device = adapter.device(address).ok()?;
        device.alias().await.ok()
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    async fn open(
        &self,
        address: &PeripheralAddress,
        attempt: u32,
    ) -> Result<Connection, TransportError> {
        let bt_address: Address = address
            .as_str()
            .parse()
            .map_err(|_| TransportError::InvalidAddress(address.to_string()))?;
        let channel = self.channel_for_attempt(attempt);

        debug!(
            "Opening RFCOMM socket to {} on channel {} (attempt {})",
            address, channel, attempt
        );

        let stream = Stream::connect(SocketAddr::new(bt_address, channel))
            .await
            .map_err(|e| TransportError::ConnectFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        info!("RFCOMM connected to {} on channel {}", address, channel);

        let connection = Connection::new(stream);
        Ok(match self.device_alias(bt_address).await {
            Some(name) => connection.with_device_name(name),
            None => connection,
        })
    }
}
