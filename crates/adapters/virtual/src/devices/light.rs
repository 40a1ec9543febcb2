//! Virtual color bulb: dimmable, tunable white, full color.

use std::sync::Arc;

use meshbridge_app::ports::{CapabilityDescriptor, Definition};
use meshbridge_domain::device::{DeviceInfo, PowerSource};

use super::VirtualModel;
use crate::converters::{ColorConverter, ColorTempConverter, OnOffConverter};
use crate::network::VirtualNetwork;

pub struct VirtualLight;

impl VirtualModel for VirtualLight {
    const MODEL: &'static str = "VBULB-1";

    fn definition(network: &Arc<VirtualNetwork>) -> Definition {
        Definition {
            model: Self::MODEL.to_string(),
            vendor: "meshbridge".to_string(),
            description: "Virtual color bulb".to_string(),
            endpoints: Default::default(),
            capabilities: vec![
                CapabilityDescriptor::new(
                    ["state", "brightness", "brightness_percent"],
                    Arc::new(OnOffConverter::new(Arc::clone(network), true)),
                ),
                CapabilityDescriptor::new(
                    ["color_temp"],
                    Arc::new(ColorTempConverter::new(Arc::clone(network))),
                ),
                CapabilityDescriptor::new(
                    ["color"],
                    Arc::new(ColorConverter::new(Arc::clone(network))),
                ),
            ],
        }
    }

    fn info(address: &str) -> DeviceInfo {
        DeviceInfo::new(address)
            .with_manufacturer("meshbridge")
            .with_model(Self::MODEL)
            .with_power_source(PowerSource::Mains)
            .with_endpoints(vec![11])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshbridge_app::ports::Operation;

    #[test]
    fn should_expose_light_keys_in_declaration_order() {
        let definition = VirtualLight::definition(&Arc::new(VirtualNetwork::new()));

        assert_eq!(
            definition.writable_keys(),
            ["state", "brightness", "brightness_percent", "color_temp", "color"]
        );
        assert!(!definition.readable_keys().contains(&"color".to_string()));
        assert!(definition.capabilities[0].converter.supports(Operation::Get));
    }

    #[test]
    fn should_report_mains_power() {
        let info = VirtualLight::info("0x01");
        assert!(!info.is_battery_powered());
        assert_eq!(info.primary_endpoint(), Some(11));
    }
}
