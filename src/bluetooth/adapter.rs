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

//! BlueZ adapter access and paired device lookup.

use anyhow::Result;
use bluer::Adapter;
use tracing::{debug, info};

use super::transport::{PeripheralAddress, TransportError};

/// A paired Bluetooth device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedDevice {
    pub address: PeripheralAddress,
    pub name: String,
}

/// Handle to the default Bluetooth adapter.
pub struct BluetoothAdapter {
    adapter: Adapter,
}

impl BluetoothAdapter {
    /// Open a BlueZ session and power on the default adapter.
    pub async fn new() -> Result<Self> {
        info!("Initializing Bluetooth adapter...");

        let session = bluer::Session::new()
            .await
            .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;
        debug!("BlueZ session created");

        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        Ok(Self { adapter })
    }

    /// Underlying BlueZ adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// List bonded devices with their display names.
    pub async fn paired_devices(&self) -> Result<Vec<PairedDevice>> {
        let mut devices = Vec::new();

        for addr in self.adapter.device_addresses().await? {
            let device = self.adapter.device(addr)?;
            if device.is_paired().await? {
                let name = device.alias().await.unwrap_or_else(|_| addr.to_string());
                devices.push(PairedDevice {
                    address: PeripheralAddress::new(addr.to_string()),
                    name,
                });
            }
        }

        debug!("Found {} paired devices", devices.len());
        Ok(devices)
    }

    /// First paired device whose name starts with `prefix`.
    pub async fn find_paired(&self, prefix: &str) -> Result<Option<PairedDevice>> {
        let devices = self.paired_devices().await?;
        Ok(select_auto_connect(&devices, prefix).cloned())
    }
}

/// Pick the auto-connect target among paired devices.
///
/// An empty prefix disables auto-connect.
pub fn select_auto_connect<'a>(devices: &'a [PairedDevice], prefix: &str) -> Option<&'a PairedDevice> {
    if prefix.is_empty() {
        return None;
    }
    devices.iter().find(|d| d.name.starts_with(prefix))
}
