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

//! Bluetooth communication module.
//!
//! Handles the RFCOMM client link to the battery monitor peripheral and
//! decoding of its telemetry stream.

mod adapter;
mod decoder;
mod link;
mod transport;

pub use adapter::{select_auto_connect, BluetoothAdapter, PairedDevice};
pub use decoder::{
    parse_line, FrameDecoder, TelemetryKey, TelemetryRecord, KEY_VALUE_SEPARATOR, MAX_LINE_LEN,
};
pub use link::{LinkConfig, LinkManager, LinkState, MAX_CONNECT_RETRIES};
pub use transport::{
    Connection, PeripheralAddress, RfcommTransport, TelemetryStream, Transport, TransportError,
    DEFAULT_RFCOMM_CHANNEL,
};
