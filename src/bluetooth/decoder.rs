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

//! Telemetry line protocol decoding.
//!
//! The peripheral streams newline-terminated `key=value` lines. Only three
//! keys carry data: `s` (speed, mph), `v` (pack voltage) and `a` (current).
//! Serial links are noisy, so anything that does not decode is dropped.

use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::trace;

/// Separator between key and value.
pub const KEY_VALUE_SEPARATOR: char = '=';

/// Longest line kept, terminator excluded. Longer lines are discarded.
pub const MAX_LINE_LEN: usize = 256;

/// One decoded measurement from the peripheral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TelemetryRecord {
    /// Ground speed in mph.
    Speed(f64),
    /// Battery pack voltage.
    Voltage(f64),
    /// Current draw in amps.
    Current(f64),
    /// Confirmed name of the peripheral.
    DeviceName(String),
    /// Free-form status text.
    Informational(String),
}

/// Keys recognised on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryKey {
    Speed,
    Voltage,
    Current,
}

impl TelemetryKey {
    /// Parse a key, ignoring case and surrounding whitespace.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" => Some(Self::Speed),
            "v" => Some(Self::Voltage),
            "a" => Some(Self::Current),
            _ => None,
        }
    }

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Speed => "s",
            Self::Voltage => "v",
            Self::Current => "a",
        }
    }

    fn record(self, value: f64) -> TelemetryRecord {
        match self {
            Self::Speed => TelemetryRecord::Speed(value),
            Self::Voltage => TelemetryRecord::Voltage(value),
            Self::Current => TelemetryRecord::Current(value),
        }
    }
}

/// Decode a single line.
///
/// Returns `None` for lines without a separator, unknown keys and values
/// that are not finite decimal numbers.
pub fn parse_line(line: &str) -> Option<TelemetryRecord> {
    let (key, value) = line.split_once(KEY_VALUE_SEPARATOR)?;
    let key = TelemetryKey::parse(key)?;
    let value: f64 = value.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(key.record(value))
}

/// Decodes telemetry records from a buffered byte stream.
///
/// Lines end at `\n`, `\r` or `\r\n`. A decoder is bound to one stream;
/// reconnecting means building a new one.
pub struct FrameDecoder<R> {
    reader: R,
    line: Vec<u8>,
    skip_lf: bool,
}

impl<R: AsyncBufRead + Unpin> FrameDecoder<R> {
    /// Create a decoder over a stream.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(64),
            skip_lf: false,
        }
    }

    /// Read the next raw line, terminator stripped.
    ///
    /// Lines longer than `MAX_LINE_LEN` are dropped whole. Returns `Ok(None)`
    /// once the stream ends.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            self.line.clear();
            let mut overlong = false;
            let mut terminated = false;

            while !terminated {
                let buf = self.reader.fill_buf().await?;
                if buf.is_empty() {
                    break;
                }
                if self.skip_lf {
                    self.skip_lf = false;
                    if buf[0] == b'\n' {
                        self.reader.consume(1);
                        continue;
                    }
                }

                let end = buf.iter().position(|&b| b == b'\n' || b == b'\r');
                let chunk = &buf[..end.unwrap_or(buf.len())];
                if self.line.len() + chunk.len() > MAX_LINE_LEN {
                    overlong = true;
                    self.line.clear();
                } else if !overlong {
                    self.line.extend_from_slice(chunk);
                }

                let used = match end {
                    Some(i) => {
                        self.skip_lf = buf[i] == b'\r';
                        terminated = true;
                        i + 1
                    }
                    None => buf.len(),
                };
                self.reader.consume(used);
            }

            if overlong {
                trace!("Discarding line longer than {} bytes", MAX_LINE_LEN);
                if terminated {
                    continue;
                }
                return Ok(None);
            }
            if !terminated && self.line.is_empty() {
                return Ok(None);
            }
            return Ok(Some(String::from_utf8_lossy(&self.line).into_owned()));
        }
    }

    /// Read until the next line that decodes into a record.
    ///
    /// Malformed lines are skipped. Returns `Ok(None)` at end of stream and
    /// an error when the underlying read fails.
    pub async fn next_record(&mut self) -> io::Result<Option<TelemetryRecord>> {
        loop {
            match self.next_line().await? {
                Some(line) => match parse_line(&line) {
                    Some(record) => return Ok(Some(record)),
                    None => trace!("Discarding line: {:?}", line.trim()),
                },
                None => return Ok(None),
            }
        }
    }
}
