// SPDX-License-Identifier: GPL-3.0-only
//! libusb-backed control channel
//!
//! The X52 Pro exposes the MFD through vendor requests on the default
//! control pipe, so no endpoint traffic is involved. The HID driver normally
//! owns interface 0; a tick tries to claim it and carries on unclaimed when
//! the kernel (or another program) already holds it.

use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, Direction, Recipient, RequestType, UsbContext};

use crate::error::{AccessError, TransferError};
use crate::hotplug::{DeviceId, UsbDeviceInfo};

use super::{ChannelProvider, ControlChannel, OpenChannel, ProtocolCommand, REQUEST};

/// Upper bound libusb applies to one control transfer
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(1);

/// Finds attached devices in a libusb context
pub struct UsbChannelProvider {
    context: Context,
}

impl UsbChannelProvider {
    pub fn new() -> Result<Self, rusb::Error> {
        Ok(Self {
            context: Context::new()?,
        })
    }
}

impl ChannelProvider for UsbChannelProvider {
    fn acquire(&self, info: &UsbDeviceInfo) -> Result<Box<dyn ControlChannel>, AccessError> {
        let denied = |source| AccessError::Denied {
            device: info.id.clone(),
            source,
        };

        let spec = info
            .spec()
            .ok_or_else(|| AccessError::NotFound(info.id.clone()))?;

        let devices = self.context.devices().map_err(denied)?;
        let device = devices
            .iter()
            .find(|d| d.bus_number() == info.bus && d.address() == info.address)
            .ok_or_else(|| AccessError::NotFound(info.id.clone()))?;

        // Bus addresses are reused, make sure this is still our device
        let descriptor = device.device_descriptor().map_err(denied)?;
        if descriptor.vendor_id() != spec.vendor_id || descriptor.product_id() != spec.product_id {
            return Err(AccessError::NotFound(info.id.clone()));
        }

        debug!(
            "Acquired {} at bus {} address {} (serial: {:?})",
            spec.name,
            info.bus,
            info.address,
            info.serial
        );

        Ok(Box::new(UsbControlChannel {
            id: info.id.clone(),
            device,
            interface: spec.control_interface,
        }))
    }
}

/// One X52 Pro on the bus
#[derive(Debug)]
pub struct UsbControlChannel {
    id: DeviceId,
    device: Device<Context>,
    interface: u8,
}

impl ControlChannel for UsbControlChannel {
    fn open(&mut self) -> Result<Box<dyn OpenChannel + '_>, AccessError> {
        let handle = self.device.open().map_err(|source| match source {
            rusb::Error::NoDevice | rusb::Error::NotFound => AccessError::NotFound(self.id.clone()),
            source => AccessError::Denied {
                device: self.id.clone(),
                source,
            },
        })?;

        let claimed = match handle.claim_interface(self.interface) {
            Ok(()) => true,
            // Someone else holds it exclusively; we only write, so that is fine
            Err(rusb::Error::Busy) => false,
            Err(source) => {
                return Err(AccessError::Denied {
                    device: self.id.clone(),
                    source,
                });
            }
        };

        Ok(Box::new(UsbOpenChannel {
            handle,
            interface: self.interface,
            claimed,
        }))
    }
}

/// A device handle held for the duration of one tick
struct UsbOpenChannel {
    handle: DeviceHandle<Context>,
    interface: u8,
    claimed: bool,
}

impl OpenChannel for UsbOpenChannel {
    fn write(&mut self, command: ProtocolCommand) -> Result<(), TransferError> {
        let request_type = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);

        self.handle
            .write_control(
                request_type,
                REQUEST,
                command.value,
                command.opcode.index(),
                &[],
                TRANSFER_TIMEOUT,
            )
            .map(|_| ())
            .map_err(|status| TransferError {
                opcode: command.opcode,
                status,
            })
    }
}

impl Drop for UsbOpenChannel {
    fn drop(&mut self) {
        if self.claimed {
            if let Err(e) = self.handle.release_interface(self.interface) {
                debug!("Failed to release interface {}: {}", self.interface, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_is_vendor_out_to_device() {
        let request_type = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        assert_eq!(request_type, 0x40);
        assert_eq!(REQUEST, 0x91);
    }
}
