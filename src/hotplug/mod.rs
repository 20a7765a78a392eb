// SPDX-License-Identifier: GPL-3.0-only
//! Device attach/detach detection using udev
//!
//! A blocking thread watches the `usb` subsystem and turns udev events into
//! [`HostEvent`]s for the registry. Detach events are forwarded for devices
//! the thread announced and for devices that hold a termination subscription.

mod interest;
mod subscription;
mod udev_monitor;

pub use interest::{TerminationToken, TerminationWatch};
pub use subscription::{DeviceNotifications, device_subscription};

use crate::devices::{self, DeviceSpec};

/// Stable identity of one attachment: the device's sysfs path
pub type DeviceId = String;

/// Notification delivered to the registry's dispatch loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A matching device appeared (or was present at startup)
    Attached(UsbDeviceInfo),
    /// A known device went away
    Terminated(DeviceId),
}

/// What the daemon knows about an attached USB device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus: u8,
    pub address: u8,
    pub serial: Option<String>,
}

impl UsbDeviceInfo {
    /// Build from a udev `usb_device`, using its uevent properties
    ///
    /// Properties rather than sysfs attributes are used so the same code
    /// works for devices that are already gone.
    pub fn from_udev(device: &udev::Device) -> Option<Self> {
        let (vendor_id, product_id) = parse_product_property(property(device, "PRODUCT")?)?;
        let bus = property(device, "BUSNUM")?.parse().ok()?;
        let address = property(device, "DEVNUM")?.parse().ok()?;

        Some(Self {
            id: device.syspath().to_string_lossy().into_owned(),
            vendor_id,
            product_id,
            bus,
            address,
            serial: property(device, "ID_SERIAL_SHORT").map(str::to_owned),
        })
    }

    /// The device spec, if this is a device we drive
    pub fn spec(&self) -> Option<DeviceSpec> {
        devices::get_device_spec(self.vendor_id, self.product_id)
    }
}

fn property<'a>(device: &'a udev::Device, key: &str) -> Option<&'a str> {
    device.property_value(key).and_then(|value| value.to_str())
}

/// Parse the `PRODUCT` uevent property (`"6a3/762/100"`: vid/pid/bcdDevice in hex)
pub fn parse_product_property(value: &str) -> Option<(u16, u16)> {
    let mut parts = value.split('/');
    let vendor_id = u16::from_str_radix(parts.next()?, 16).ok()?;
    let product_id = u16::from_str_radix(parts.next()?, 16).ok()?;
    Some((vendor_id, product_id))
}
