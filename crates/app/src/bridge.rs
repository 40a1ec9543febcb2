//! Composition root of the application core.
//!
//! [`Bridge`] wires the event bus, the converter pipeline, both namespace
//! delegates and the three call surfaces (envelope API, command router,
//! legacy options) on top of the ports supplied by the binary.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::api::Api;
use crate::commands::{CommandRouter, Context};
use crate::event_bus::{EventBus, PathChangeFeed};
use crate::legacy::LegacyBridge;
use crate::pipeline::ConverterPipeline;
use crate::ports::{DefinitionRegistry, LogLevelControl, Network, SettingsStore, StateStore};
use crate::publisher::EntityStatePublisher;
use crate::resolver::Resolver;
use crate::services::{DevicesApi, GroupsApi};
use crate::session::Session;

/// Buffered path changes per session before it is considered lagging.
pub const PATH_CHANGE_CAPACITY: usize = 1024;

pub struct Bridge {
    pub bus: Arc<EventBus>,
    pub feed: PathChangeFeed,
    pub resolver: Resolver,
    pub publisher: EntityStatePublisher,
    pub pipeline: ConverterPipeline,
    pub devices: Arc<DevicesApi>,
    pub groups: Arc<GroupsApi>,
    pub api: Arc<Api>,
    pub commands: Arc<CommandRouter>,
    pub legacy: Arc<LegacyBridge>,
}

impl Bridge {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        state: Arc<dyn StateStore>,
        network: Arc<dyn Network>,
        registry: Arc<dyn DefinitionRegistry>,
        log_level: Arc<dyn LogLevelControl>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let feed = PathChangeFeed::attach(&bus, PATH_CHANGE_CAPACITY);
        let resolver = Resolver::new(settings, network, registry);
        let publisher = EntityStatePublisher::new(Arc::clone(&bus), Arc::clone(&state));
        let pipeline = ConverterPipeline::new(resolver.clone(), Arc::clone(&state), publisher.clone());

        let devices = Arc::new(DevicesApi::new(
            resolver.clone(),
            Arc::clone(&state),
            Arc::clone(&bus),
            pipeline.clone(),
            publisher.clone(),
        ));
        devices.subscribe();
        let groups = Arc::new(GroupsApi::new(
            resolver.clone(),
            state,
            Arc::clone(&bus),
            pipeline.clone(),
        ));
        groups.subscribe();

        let api = Arc::new(Api::new(Arc::clone(&devices), Arc::clone(&groups)));
        let commands = Arc::new(CommandRouter::new(Context {
            resolver: resolver.clone(),
            pipeline: pipeline.clone(),
            devices: Arc::clone(&devices),
            groups: Arc::clone(&groups),
        }));
        let legacy = Arc::new(LegacyBridge::new(
            Arc::clone(&api),
            resolver.clone(),
            log_level,
            &bus,
        ));

        tracing::debug!("bridge core wired");
        Self {
            bus,
            feed,
            resolver,
            publisher,
            pipeline,
            devices,
            groups,
            api,
            commands,
            legacy,
        }
    }

    /// Open a persistent session and return it with its initial snapshot.
    #[must_use]
    pub fn open_session(&self) -> (Session, Value) {
        Session::open(Arc::clone(&self.api), &self.feed)
    }

    /// Forward network events to the devices delegate until the network
    /// closes its channel.
    pub fn spawn_network_listener(&self) -> JoinHandle<()> {
        let mut events = self.resolver.network().subscribe();
        let devices = Arc::clone(&self.devices);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => devices.handle_network_event(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "network event listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("network event listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::ports::NetworkEvent;
    use crate::test_support::Harness;
    use meshbridge_domain::device::DeviceInfo;
    use meshbridge_domain::event::EventKind;

    #[tokio::test]
    async fn should_register_both_delegates_on_bus() {
        let harness = Harness::new();
        let bridge = harness.bridge();

        assert!(bridge.bus.subscriber_count(EventKind::StateChange) >= 2);
        assert_eq!(bridge.bus.subscriber_count(EventKind::PathChange), 1);
    }

    #[tokio::test]
    async fn should_apply_network_reports_through_listener() {
        let harness = Harness::new();
        harness.add_device("0xb1", "BULB", "bulb");
        let bridge = harness.bridge();
        let handle = bridge.spawn_network_listener();
        let mut changes = bridge.feed.subscribe();

        harness.network.emit(NetworkEvent::Report {
            device: "0xb1".into(),
            payload: json!({"state": "OFF"}).as_object().cloned().unwrap(),
        });

        let change = tokio::time::timeout(Duration::from_secs(1), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.path.to_string(), "devices/0xb1/state");
        assert_eq!(harness.state_of("0xb1").get("state"), Some(&json!("OFF")));
        handle.abort();
    }

    #[tokio::test]
    async fn should_announce_joined_device() {
        let harness = Harness::new();
        let bridge = harness.bridge();
        let handle = bridge.spawn_network_listener();
        let mut changes = bridge.feed.subscribe();
        let info = DeviceInfo::new("0xnew").with_model("BULB");
        harness.network.add(info.clone());

        harness.network.emit(NetworkEvent::DeviceJoined(info));

        let change = tokio::time::timeout(Duration::from_secs(1), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.path.to_string(), "devices/0xnew");
        handle.abort();
    }
}
