// SPDX-License-Identifier: GPL-3.0-only
//! Saitek X52 Pro specifications

use crate::devices::DeviceSpec;

/// USB Product ID for the X52 Pro throttle/stick pair
pub const PRODUCT_ID: u16 = 0x0762;

/// Device specification for the X52 Pro
///
/// The throttle carries the MFD (clock, date, two text lines) and the
/// button LEDs. Both backlights take a level from 0 to 128.
pub const SPEC: DeviceSpec = DeviceSpec {
    vendor_id: super::VENDOR_ID,
    product_id: PRODUCT_ID,
    name: "Saitek X52 Pro Flight Control System",
    control_interface: 0,
};
