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

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::bluetooth::{LinkConfig, DEFAULT_RFCOMM_CHANNEL};
use crate::state::{BatteryRange, SpeedSource};

const APP_DIR: &str = "battery-monitor";

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Display settings.
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Peripheral to connect to. Falls back to auto-connect when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_address: Option<String>,

    /// Paired devices whose name starts with this are auto-connected.
    /// Empty disables auto-connect.
    pub auto_connect_prefix: String,

    /// RFCOMM channel for the first attempt.
    pub rfcomm_channel: u8,

    /// RFCOMM channel for the retry.
    pub fallback_channel: u8,

    /// Connect timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            device_address: None,
            auto_connect_prefix: "RN".to_string(),
            rfcomm_channel: DEFAULT_RFCOMM_CHANNEL,
            fallback_channel: DEFAULT_RFCOMM_CHANNEL,
            connect_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// "device" or "gps".
    pub speed_source: SpeedSource,

    /// Voltage shown as an empty battery.
    pub battery_min_voltage: f64,

    /// Voltage shown as a full battery.
    pub battery_max_voltage: f64,

    /// Seconds between status log lines.
    pub status_interval_secs: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        let battery = BatteryRange::default();
        Self {
            speed_source: SpeedSource::Device,
            battery_min_voltage: battery.min_voltage,
            battery_max_voltage: battery.max_voltage,
            status_interval_secs: 5,
        }
    }
}

impl DisplayConfig {
    pub fn battery_range(&self) -> BatteryRange {
        BatteryRange {
            min_voltage: self.battery_min_voltage,
            max_voltage: self.battery_max_voltage,
        }
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }

    /// Speed source to run with. GPS mode needs a location provider; without
    /// one, device speed records are used instead.
    pub fn effective_speed_source(&self, gps_available: bool) -> SpeedSource {
        match self.speed_source {
            SpeedSource::Gps if !gps_available => {
                warn!("GPS speed source configured but no location provider, using device speed");
                SpeedSource::Device
            }
            source => source,
        }
    }
}

impl Config {
    /// Default location of the config file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load configuration from the default file or create it.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Link settings derived from the Bluetooth section.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            connect_timeout: self.bluetooth.connect_timeout_ms.map(Duration::from_millis),
        }
    }
}
