//! # meshbridged: meshbridge daemon
//!
//! Composition root that wires all adapters together and starts the bridge.
//!
//! ## Responsibilities
//! - Load configuration (`meshbridge.toml`, env vars)
//! - Install the tracing subscriber with a reloadable filter
//! - Seed the in-memory settings store from configuration
//! - Pair the virtual network (demo devices when enabled)
//! - Wire the bridge core and forward network events into it
//! - Serve HTTP + WebSocket, line-delimited TCP and MQTT
//! - Shut down on Ctrl-C
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer: no domain logic belongs here.

mod config;
mod logging;

use std::sync::Arc;

use meshbridge_adapter_http_axum::state::AppState;
use meshbridge_adapter_memory::{MemorySettingsStore, MemoryStateStore};
use meshbridge_adapter_mqtt::MqttHandler;
use meshbridge_adapter_virtual::{VirtualNetwork, VirtualRegistry};
use meshbridge_app::bridge::Bridge;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let log_level = Arc::new(logging::init(&config.logging.filter));

    // Stores
    let settings = Arc::new(MemorySettingsStore::seeded(
        config.device_settings(),
        config.group_settings()?,
    )?);
    let state = Arc::new(MemoryStateStore::new());

    // Network
    let (network, registry) = if config.integrations.virtual_enabled {
        meshbridge_adapter_virtual::demo()
    } else {
        let network = Arc::new(VirtualNetwork::new());
        let registry = Arc::new(VirtualRegistry::new(&network));
        (network, registry)
    };

    // Core
    let bridge = Bridge::new(settings, state, network, registry, log_level);
    bridge.devices.adopt_network_devices()?;
    let listener_task = bridge.spawn_network_listener();

    // TCP
    let tcp_task = if config.tcp.enabled {
        let listener = tokio::net::TcpListener::bind(config.tcp_bind_addr()).await?;
        tracing::info!(addr = %config.tcp_bind_addr(), "TCP sessions listening");
        let api = Arc::clone(&bridge.api);
        let feed = bridge.feed.clone();
        Some(tokio::spawn(async move {
            if let Err(error) = meshbridge_adapter_tcp::serve(listener, api, feed).await {
                tracing::error!(%error, "TCP server stopped");
            }
        }))
    } else {
        None
    };

    // MQTT
    let mqtt_task = config.mqtt.enabled.then(|| {
        meshbridge_adapter_mqtt::spawn(
            &config.mqtt,
            MqttHandler::new(&config.mqtt, &bridge),
            &bridge.feed,
        )
    });

    // HTTP
    let app = meshbridge_adapter_http_axum::router::build(AppState::from_bridge(&bridge));
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!(addr = %config.bind_addr(), "meshbridged listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in [Some(listener_task), tcp_task, mqtt_task].into_iter().flatten() {
        task.abort();
    }
    tracing::info!("meshbridged stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
