//! Simulated device models: bulb, dual relay, button.
//!
//! Each model contributes a [`Definition`] bound to the network's
//! converters and a way to mint [`DeviceInfo`] records for it. The demo set
//! uses fixed addresses so settings keyed by address survive restarts.

mod button;
mod light;
mod switch;

pub use button::VirtualButton;
pub use light::VirtualLight;
pub use switch::VirtualSwitch;

use std::sync::Arc;

use meshbridge_app::ports::Definition;
use meshbridge_domain::device::DeviceInfo;

use crate::network::VirtualNetwork;

/// Model id of a device the registry deliberately does not know.
pub const UNSUPPORTED_MODEL: &str = "VGADGET-0";

/// A simulated device model.
pub trait VirtualModel {
    /// Model id reported by the device.
    const MODEL: &'static str;

    fn definition(network: &Arc<VirtualNetwork>) -> Definition;

    /// Network record for a device of this model at `address`.
    fn info(address: &str) -> DeviceInfo;
}

/// Devices paired on a fresh demo network.
#[must_use]
pub fn demo_devices() -> Vec<DeviceInfo> {
    vec![
        VirtualLight::info("0x00124b0000000001"),
        VirtualLight::info("0x00124b0000000002"),
        VirtualSwitch::info("0x00124b0000000003"),
        VirtualButton::info("0x00124b0000000004"),
        DeviceInfo::new("0x00124b0000000005")
            .with_manufacturer("Nobody")
            .with_model(UNSUPPORTED_MODEL),
    ]
}
