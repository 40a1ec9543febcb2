//! Virtual battery remote. Has no settable attributes; presses arrive as
//! `action` reports.

use std::sync::Arc;

use serde_json::{Map, Value};

use meshbridge_app::ports::Definition;
use meshbridge_domain::device::{DeviceInfo, DeviceKind, PowerSource};
use meshbridge_domain::id::DeviceId;

use super::VirtualModel;
use crate::network::VirtualNetwork;

pub struct VirtualButton;

impl VirtualButton {
    /// Simulate a press, e.g. `single` or `double`.
    pub fn press(network: &VirtualNetwork, device: &DeviceId, action: &str) {
        let mut payload = Map::new();
        payload.insert("action".to_string(), Value::from(action));
        payload.insert("linkquality".to_string(), Value::from(120));
        network.report(device, payload);
    }
}

impl VirtualModel for VirtualButton {
    const MODEL: &'static str = "VBUTTON-1";

    fn definition(_network: &Arc<VirtualNetwork>) -> Definition {
        Definition {
            model: Self::MODEL.to_string(),
            vendor: "meshbridge".to_string(),
            description: "Virtual wireless button".to_string(),
            ..Definition::default()
        }
    }

    fn info(address: &str) -> DeviceInfo {
        DeviceInfo::new(address)
            .with_kind(DeviceKind::EndDevice)
            .with_manufacturer("meshbridge")
            .with_model(Self::MODEL)
            .with_power_source(PowerSource::Battery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshbridge_app::ports::{Network, NetworkEvent};
    use serde_json::json;

    #[tokio::test]
    async fn should_report_press_as_action() {
        let network = VirtualNetwork::new();
        network.insert(VirtualButton::info("0xbb"));
        let mut events = network.subscribe();

        VirtualButton::press(&network, &DeviceId::new("0xbb"), "double");

        let NetworkEvent::Report { payload, .. } = events.recv().await.unwrap() else {
            panic!("expected a report");
        };
        assert_eq!(payload.get("action"), Some(&json!("double")));
    }

    #[test]
    fn should_be_battery_powered() {
        assert!(VirtualButton::info("0xbb").is_battery_powered());
    }
}
