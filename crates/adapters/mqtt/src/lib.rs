//! # meshbridge-adapter-mqtt
//!
//! MQTT transport for the bridge, built on `rumqttc`.
//!
//! ## Topics
//! - `<new_base>/<path...>`: one retained topic per namespace unit, kept up
//!   to date from the path-change feed
//! - `<new_base>/request/<id>` → `<new_base>/response/<id>`: envelope calls
//! - `<base>/bridge/request/<command>` → `<base>/bridge/response/<command>`:
//!   command-router calls
//! - `<base>/bridge/config/<option>`: legacy options (when `legacy_api`)
//! - `<base>/<name>[/<endpoint>]/(set|get)[/<attribute>]`: entity shortcuts
//!
//! ## Dependency rule
//! Depends on `meshbridge-app` and `meshbridge-domain`, never on another
//! adapter.

pub mod config;
pub mod error;
pub mod handler;
pub mod topics;

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use meshbridge_app::event_bus::PathChangeFeed;
use meshbridge_domain::event::PathChange;

pub use config::MqttConfig;
pub use error::MqttError;
pub use handler::MqttHandler;

use topics::Outbound;

/// Requests the client may queue before `publish` waits for the event loop.
const CLIENT_CAPACITY: usize = 64;

/// Pause between reconnection attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Work handed from the event loop to the sequential worker.
enum Work {
    Connected,
    Message { topic: String, payload: Vec<u8> },
}

/// Connect to the broker and serve the bridge over MQTT.
///
/// Inbound messages are handled one at a time, in arrival order, on a
/// worker task; the event loop only polls the connection. Path changes are
/// forwarded by a third task. The returned handle drives the event loop and
/// reconnects after every connection error.
pub fn spawn(config: &MqttConfig, handler: MqttHandler, feed: &PathChangeFeed) -> JoinHandle<()> {
    let mut options = MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
    options.set_keep_alive(Duration::from_secs(u64::from(config.keep_alive_secs)));
    let (client, event_loop) = AsyncClient::new(options, CLIENT_CAPACITY);
    let handler = Arc::new(handler);

    let (work_tx, work_rx) = mpsc::unbounded_channel();
    tokio::spawn(work(client.clone(), Arc::clone(&handler), work_rx));
    tokio::spawn(forward_changes(client, handler, feed.subscribe()));

    tracing::info!(
        host = %config.broker_host,
        port = config.broker_port,
        "connecting to MQTT broker"
    );
    tokio::spawn(poll(event_loop, work_tx))
}

async fn poll(mut event_loop: EventLoop, work: mpsc::UnboundedSender<Work>) {
    loop {
        let item = match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("connected to MQTT broker");
                Work::Connected
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => Work::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            },
            Ok(_) => continue,
            Err(error) => {
                let error = MqttError::from(error);
                tracing::warn!(%error, "MQTT connection lost, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        if work.send(item).is_err() {
            break;
        }
    }
    tracing::debug!("MQTT event loop stopped");
}

async fn work(client: AsyncClient, handler: Arc<MqttHandler>, mut queue: mpsc::UnboundedReceiver<Work>) {
    while let Some(item) = queue.recv().await {
        let result = match item {
            Work::Connected => on_connected(&client, &handler).await,
            Work::Message { topic, payload } => {
                let replies = handler.handle(&topic, &payload).await;
                publish_all(&client, replies).await
            }
        };
        if let Err(error) = result {
            tracing::error!(%error, "failed to publish to MQTT broker");
        }
    }
}

async fn on_connected(client: &AsyncClient, handler: &MqttHandler) -> Result<(), MqttError> {
    let filters = handler
        .subscriptions()
        .into_iter()
        .map(|path| SubscribeFilter::new(path, QoS::AtMostOnce));
    client.subscribe_many(filters).await?;

    let initial = handler.on_connected();
    tracing::debug!(count = initial.len(), "publishing retained state");
    publish_all(client, initial).await?;
    handler.refresh_devices().await;
    Ok(())
}

async fn forward_changes(
    client: AsyncClient,
    handler: Arc<MqttHandler>,
    mut changes: broadcast::Receiver<PathChange>,
) {
    loop {
        match changes.recv().await {
            Ok(change) => {
                let outbound = handler.topics().change(&change);
                if let Err(error) = publish(&client, outbound).await {
                    tracing::error!(%error, "failed to publish path change");
                }
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "MQTT change forwarder lagged, republishing state");
                if let Err(error) = publish_all(&client, handler.on_connected()).await {
                    tracing::error!(%error, "failed to republish state");
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn publish(client: &AsyncClient, outbound: Outbound) -> Result<(), MqttError> {
    client
        .publish(outbound.topic, QoS::AtMostOnce, outbound.retain, outbound.payload)
        .await?;
    Ok(())
}

async fn publish_all(client: &AsyncClient, outbound: Vec<Outbound>) -> Result<(), MqttError> {
    for message in outbound {
        publish(client, message).await?;
    }
    Ok(())
}
