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

//! Display state fed by link events.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::bluetooth::{LinkState, TelemetryRecord};
use crate::events::{LinkEvent, Subscriber};

/// Meters per second to miles per hour.
pub const MPS_TO_MPH: f64 = 2.23693629;

/// Shown when both connection attempts fail.
pub const ALERT_CONNECT_FAILED: &str = "Unable to connect device";

/// Shown when an established connection drops.
pub const ALERT_CONNECTION_LOST: &str = "Device connection was lost";

/// Where the speedometer reading comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedSource {
    /// Speed records from the peripheral, already in mph.
    #[default]
    Device,
    /// Location fixes in m/s.
    Gps,
}

/// Voltage span mapped onto the battery gauge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryRange {
    pub min_voltage: f64,
    pub max_voltage: f64,
}

impl Default for BatteryRange {
    fn default() -> Self {
        Self {
            min_voltage: 34.2,
            max_voltage: 40.0,
        }
    }
}

impl BatteryRange {
    /// Charge fraction in `[0, 1]` for a pack voltage.
    pub fn fraction(&self, voltage: f64) -> f64 {
        let span = self.max_voltage - self.min_voltage;
        if span <= 0.0 {
            return if voltage >= self.max_voltage { 1.0 } else { 0.0 };
        }
        ((voltage - self.min_voltage) / span).clamp(0.0, 1.0)
    }
}

/// Latest values for the gauges.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Readings {
    pub speed_mph: Option<f64>,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub updated_at: Option<DateTime<Local>>,
}

/// Shared display state.
#[derive(Debug)]
pub struct AppState {
    /// Current link state.
    pub link_state: RwLock<LinkState>,

    /// Connected device name.
    pub connected_device: RwLock<Option<String>>,

    /// Most recent readings. Kept across disconnects.
    pub readings: RwLock<Readings>,

    pub speed_source: RwLock<SpeedSource>,

    /// Last user-facing alert.
    pub last_alert: RwLock<Option<String>>,

    battery: BatteryRange,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            link_state: RwLock::new(LinkState::Idle),
            connected_device: RwLock::new(None),
            readings: RwLock::new(Readings::default()),
            speed_source: RwLock::new(SpeedSource::Device),
            last_alert: RwLock::new(None),
            battery: BatteryRange::default(),
        }
    }
}

impl AppState {
    pub fn new(battery: BatteryRange, speed_source: SpeedSource) -> Arc<Self> {
        Arc::new(Self {
            battery,
            speed_source: RwLock::new(speed_source),
            ..Self::default()
        })
    }

    /// Fold one link event into the state.
    pub fn apply(&self, event: &LinkEvent) {
        match event {
            LinkEvent::StateChanged { state, device_name } => {
                *self.link_state.write() = *state;
                *self.connected_device.write() = device_name.clone();
                if *state == LinkState::Connecting {
                    *self.last_alert.write() = None;
                }
            }
            LinkEvent::Telemetry(record) => self.apply_record(record),
            LinkEvent::ConnectionFailed => {
                *self.last_alert.write() = Some(ALERT_CONNECT_FAILED.to_string());
            }
            LinkEvent::ConnectionLost => {
                *self.last_alert.write() = Some(ALERT_CONNECTION_LOST.to_string());
            }
        }
    }

    fn apply_record(&self, record: &TelemetryRecord) {
        let mut readings = self.readings.write();
        match record {
            TelemetryRecord::Speed(mph) => {
                if self.get_speed_source() != SpeedSource::Device {
                    return;
                }
                readings.speed_mph = Some(*mph);
            }
            TelemetryRecord::Voltage(volts) => readings.voltage = Some(*volts),
            TelemetryRecord::Current(amps) => readings.current = Some(*amps),
            TelemetryRecord::DeviceName(name) => {
                *self.connected_device.write() = Some(name.clone());
                return;
            }
            TelemetryRecord::Informational(text) => {
                debug!("Peripheral: {}", text);
                return;
            }
        }
        readings.updated_at = Some(Local::now());
    }

    /// Feed a GPS speed in m/s. Ignored unless the source is GPS.
    pub fn set_gps_speed(&self, meters_per_second: f64) {
        if self.get_speed_source() != SpeedSource::Gps {
            return;
        }
        let mut readings = self.readings.write();
        readings.speed_mph = Some(meters_per_second * MPS_TO_MPH);
        readings.updated_at = Some(Local::now());
    }

    pub fn set_speed_source(&self, source: SpeedSource) {
        *self.speed_source.write() = source;
    }

    pub fn get_speed_source(&self) -> SpeedSource {
        *self.speed_source.read()
    }

    pub fn get_status(&self) -> LinkState {
        *self.link_state.read()
    }

    pub fn get_device_name(&self) -> Option<String> {
        self.connected_device.read().clone()
    }

    pub fn get_readings(&self) -> Readings {
        self.readings.read().clone()
    }

    pub fn get_last_alert(&self) -> Option<String> {
        self.last_alert.read().clone()
    }

    /// Battery charge fraction from the last voltage.
    pub fn battery_fraction(&self) -> Option<f64> {
        self.readings.read().voltage.map(|v| self.battery.fraction(v))
    }

    /// One-line summary, e.g. for a periodic status log.
    pub fn status_line(&self) -> String {
        let title = match (self.get_status(), self.get_device_name()) {
            (LinkState::Connected, Some(name)) => format!("Connected: {}", name),
            (state, _) => state.as_str().to_string(),
        };
        let readings = self.get_readings();
        let fmt = |value: Option<f64>, unit: &str| match value {
            Some(v) => format!("{:.1}{}", v, unit),
            None => format!("--{}", unit),
        };
        let battery = self
            .battery_fraction()
            .map(|f| format!("{:.0}%", f * 100.0))
            .unwrap_or_else(|| "--%".to_string());

        format!(
            "{} | {} {} {} | battery {}",
            title,
            fmt(readings.speed_mph, " mph"),
            fmt(readings.voltage, " V"),
            fmt(readings.current, " A"),
            battery
        )
    }
}

impl Subscriber for AppState {
    fn on_event(&self, event: &LinkEvent) {
        self.apply(event);
    }
}
