//! # meshbridge-adapter-virtual
//!
//! Simulated control network and converter registry, so the bridge runs
//! without radio hardware.
//!
//! ## Provided models
//!
//! | Model | Description | Behaviour |
//! |-------|-------------|-----------|
//! | `VBULB-1` | Virtual color bulb | `state`, `brightness`, `brightness_percent`, `color_temp`, `color` |
//! | `VSWITCH-2` | Virtual dual relay | `state_left` / `state_right`, read back after writes |
//! | `VBUTTON-1` | Virtual wireless button | battery powered, reports `action` |
//! | `VGADGET-0` | - | unknown to the registry, shows up as unsupported |
//!
//! ## Dependency rule
//!
//! Depends on `meshbridge-app` (port traits) and `meshbridge-domain` only.

mod converters;
mod devices;
mod network;
mod registry;

use std::sync::Arc;

pub use devices::{VirtualButton, VirtualLight, VirtualModel, VirtualSwitch, demo_devices};
pub use network::{COORDINATOR_ADDRESS, VirtualNetwork};
pub use registry::VirtualRegistry;

/// A network pre-paired with the demo devices, and its registry.
#[must_use]
pub fn demo() -> (Arc<VirtualNetwork>, Arc<VirtualRegistry>) {
    let network = Arc::new(VirtualNetwork::new());
    for info in demo_devices() {
        network.insert(info);
    }
    let registry = Arc::new(VirtualRegistry::new(&network));
    (network, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshbridge_app::ports::{DefinitionRegistry, Network};

    #[test]
    fn should_pair_demo_devices_next_to_coordinator() {
        let (network, _) = demo();
        assert_eq!(network.devices().len(), demo_devices().len() + 1);
    }

    #[test]
    fn should_leave_one_demo_device_unsupported() {
        let (network, registry) = demo();

        let unsupported = network
            .devices()
            .into_iter()
            .filter(|d| !d.is_coordinator())
            .filter(|d| registry.find_by_device(d).is_none())
            .count();

        assert_eq!(unsupported, 1);
    }
}
