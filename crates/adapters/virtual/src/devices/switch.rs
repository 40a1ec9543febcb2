//! Virtual dual relay: two named endpoints, no spontaneous reports.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use meshbridge_app::ports::{CapabilityDescriptor, Definition};
use meshbridge_domain::device::{DeviceInfo, PowerSource};

use super::VirtualModel;
use crate::converters::OnOffConverter;
use crate::network::VirtualNetwork;

/// The relay does not report after switching, so state is read back.
const READ_BACK_DELAY: Duration = Duration::from_millis(500);

pub struct VirtualSwitch;

impl VirtualModel for VirtualSwitch {
    const MODEL: &'static str = "VSWITCH-2";

    fn definition(network: &Arc<VirtualNetwork>) -> Definition {
        Definition {
            model: Self::MODEL.to_string(),
            vendor: "meshbridge".to_string(),
            description: "Virtual dual relay".to_string(),
            endpoints: BTreeMap::from([("left".to_string(), 1), ("right".to_string(), 2)]),
            capabilities: vec![CapabilityDescriptor::new(
                ["state"],
                Arc::new(
                    OnOffConverter::new(Arc::clone(network), false)
                        .read_after_write(READ_BACK_DELAY),
                ),
            )],
        }
    }

    fn info(address: &str) -> DeviceInfo {
        DeviceInfo::new(address)
            .with_manufacturer("meshbridge")
            .with_model(Self::MODEL)
            .with_power_source(PowerSource::Mains)
            .with_endpoints(vec![1, 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_name_both_endpoints() {
        let definition = VirtualSwitch::definition(&Arc::new(VirtualNetwork::new()));

        assert_eq!(definition.endpoint_id("left"), Some(1));
        assert_eq!(definition.endpoint_id("right"), Some(2));
        assert_eq!(definition.endpoint_name(2), Some("right"));
    }
}
