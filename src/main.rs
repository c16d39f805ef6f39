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

//! Battery Monitor Desktop Application
//!
//! Usage: battery-monitor [--json] [ADDRESS]

use anyhow::Result;
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use battery_monitor::bluetooth::{BluetoothAdapter, PeripheralAddress, RfcommTransport};
use battery_monitor::config::Config;
use battery_monitor::events::{LinkEvent, TelemetryDispatcher};
use battery_monitor::state::AppState;

/// No location provider is wired into the desktop build.
const GPS_AVAILABLE: bool = false;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("battery_monitor=info".parse()?),
        )
        .init();

    info!(
        "Starting Battery Monitor v{}...",
        env!("CARGO_PKG_VERSION")
    );

    let args: Vec<String> = env::args().skip(1).collect();
    let json_output = args.iter().any(|a| a == "--json");
    let address_arg = args.iter().find(|a| !a.starts_with("--"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    // Initialize Bluetooth
    let adapter = BluetoothAdapter::new().await?;
    let transport = Arc::new(RfcommTransport::new(
        Some(adapter.adapter().clone()),
        config.bluetooth.rfcomm_channel,
        config.bluetooth.fallback_channel,
    ));

    let dispatcher = TelemetryDispatcher::new(transport, config.link_config());

    // Display state
    let state = AppState::new(
        config.display.battery_range(),
        config.display.effective_speed_source(GPS_AVAILABLE),
    );
    dispatcher.subscribe(state.clone());

    if json_output {
        dispatcher.subscribe(Arc::new(|event: &LinkEvent| {
            match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to encode event: {}", e),
            }
        }));
    }

    // Pick the peripheral
    let configured = address_arg
        .cloned()
        .or_else(|| config.bluetooth.device_address.clone());
    let target = match configured {
        Some(address) => Some(address.parse::<PeripheralAddress>()?),
        None => {
            let prefix = &config.bluetooth.auto_connect_prefix;
            match adapter.find_paired(prefix).await? {
                Some(device) => {
                    info!("Attempting to auto connect with {}", device.name);
                    Some(device.address)
                }
                None => {
                    warn!("No device configured and none paired matching '{}'", prefix);
                    None
                }
            }
        }
    };

    if let Some(address) = target {
        dispatcher.connect(address);
    }

    info!("Ready.");

    let mut status_tick = tokio::time::interval(config.display.status_interval());
    loop {
        tokio::select! {
            _ = status_tick.tick() => {
                info!("{}", state.status_line());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    dispatcher.shutdown().await;
    info!("Battery Monitor stopped");
    Ok(())
}
