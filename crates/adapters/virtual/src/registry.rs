//! [`DefinitionRegistry`] over the simulated models.

use std::collections::HashMap;
use std::sync::Arc;

use meshbridge_app::ports::{CapabilityDescriptor, Definition, DefinitionRegistry};
use meshbridge_domain::device::DeviceInfo;

use crate::converters::{
    AlertConverter, BrightnessMoveConverter, ColorConverter, ColorTempConverter, CoverConverter,
    IgnoreTransitionConverter, OnOffConverter, SceneRecallConverter, SetpointConverter,
};
use crate::devices::{VirtualButton, VirtualLight, VirtualModel, VirtualSwitch};
use crate::network::VirtualNetwork;

pub struct VirtualRegistry {
    definitions: HashMap<&'static str, Arc<Definition>>,
    group_capabilities: Vec<CapabilityDescriptor>,
}

impl VirtualRegistry {
    /// Definitions whose converters drive `network`.
    #[must_use]
    pub fn new(network: &Arc<VirtualNetwork>) -> Self {
        let definitions = HashMap::from([
            (VirtualLight::MODEL, Arc::new(VirtualLight::definition(network))),
            (VirtualSwitch::MODEL, Arc::new(VirtualSwitch::definition(network))),
            (VirtualButton::MODEL, Arc::new(VirtualButton::definition(network))),
        ]);
        let group_capabilities = vec![
            CapabilityDescriptor::new(
                ["state", "brightness", "brightness_percent"],
                Arc::new(OnOffConverter::new(Arc::clone(network), true)),
            ),
            CapabilityDescriptor::new(
                ["color_temp"],
                Arc::new(ColorTempConverter::new(Arc::clone(network))),
            ),
            CapabilityDescriptor::new(["color"], Arc::new(ColorConverter::new(Arc::clone(network)))),
            CapabilityDescriptor::new(
                ["alert", "flash"],
                Arc::new(AlertConverter::new(Arc::clone(network))),
            ),
            CapabilityDescriptor::new(["transition"], Arc::new(IgnoreTransitionConverter)),
            CapabilityDescriptor::new(
                ["position", "tilt"],
                Arc::new(CoverConverter::new(Arc::clone(network))),
            ),
            CapabilityDescriptor::new(
                ["occupied_heating_setpoint"],
                Arc::new(SetpointConverter::new(Arc::clone(network))),
            ),
            CapabilityDescriptor::new(
                ["scene_recall"],
                Arc::new(SceneRecallConverter::new(Arc::clone(network))),
            ),
            CapabilityDescriptor::new(
                ["brightness_move", "brightness_move_onoff"],
                Arc::new(BrightnessMoveConverter::new(Arc::clone(network))),
            ),
        ];
        Self {
            definitions,
            group_capabilities,
        }
    }
}

impl DefinitionRegistry for VirtualRegistry {
    fn find_by_device(&self, device: &DeviceInfo) -> Option<Arc<Definition>> {
        let model = device.model_id.as_deref()?;
        self.definitions.get(model).cloned()
    }

    fn group_capabilities(&self) -> Vec<CapabilityDescriptor> {
        self.group_capabilities.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::UNSUPPORTED_MODEL;

    #[test]
    fn should_find_definition_by_model_id() {
        let registry = VirtualRegistry::new(&Arc::new(VirtualNetwork::new()));

        let found = registry.find_by_device(&VirtualSwitch::info("0x01")).unwrap();

        assert_eq!(found.model, "VSWITCH-2");
    }

    #[test]
    fn should_not_support_unknown_or_missing_model() {
        let registry = VirtualRegistry::new(&Arc::new(VirtualNetwork::new()));

        assert!(registry.find_by_device(&DeviceInfo::new("0x01")).is_none());
        assert!(registry
            .find_by_device(&DeviceInfo::new("0x02").with_model(UNSUPPORTED_MODEL))
            .is_none());
    }

    #[test]
    fn should_offer_light_capabilities_to_groups() {
        let registry = VirtualRegistry::new(&Arc::new(VirtualNetwork::new()));

        let keys: Vec<String> = registry
            .group_capabilities()
            .iter()
            .flat_map(|c| c.keys.clone())
            .collect();

        assert_eq!(
            keys,
            [
                "state",
                "brightness",
                "brightness_percent",
                "color_temp",
                "color",
                "alert",
                "flash",
                "transition",
                "position",
                "tilt",
                "occupied_heating_setpoint",
                "scene_recall",
                "brightness_move",
                "brightness_move_onoff",
            ]
        );
    }
}
