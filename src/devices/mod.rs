// SPDX-License-Identifier: GPL-3.0-only
//! Device identification table

pub mod saitek;

/// Identification of a supported peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    /// USB Vendor ID
    pub vendor_id: u16,

    /// USB Product ID
    pub product_id: u16,

    /// Human-readable device name
    pub name: &'static str,

    /// Interface claimed while a tick holds the channel open
    pub control_interface: u8,
}

/// Look up the spec for a vendor/product pair
pub fn get_device_spec(vendor_id: u16, product_id: u16) -> Option<DeviceSpec> {
    match (vendor_id, product_id) {
        (saitek::VENDOR_ID, saitek::x52_pro::PRODUCT_ID) => Some(saitek::x52_pro::SPEC),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_spec_lookup() {
        let spec = get_device_spec(0x06a3, 0x0762).expect("X52 Pro spec not found");
        assert_eq!(spec.name, "Saitek X52 Pro Flight Control System");
        assert_eq!(spec.control_interface, 0);

        assert!(get_device_spec(0x06a3, 0x0255).is_none());
        assert!(get_device_spec(0x05ac, 0x0762).is_none());
    }
}
