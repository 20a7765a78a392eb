// SPDX-License-Identifier: GPL-3.0-only
//! X52 Pro MFD control protocol
//!
//! The MFD is driven with vendor control transfers that carry no data stage:
//! the opcode goes in `wIndex` and the 16-bit payload in `wValue`. The device
//! never answers, so everything here is write-only.

pub mod encoder;
pub mod usb_control;

use std::fmt;

use crate::error::{AccessError, TransferError};
use crate::hotplug::UsbDeviceInfo;

/// `bRequest` used for every MFD command
pub const REQUEST: u8 = 0x91;

/// Device-specific command selector, sent as the transfer index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    PrimaryClock = 0xc0,
    DateDayMonth = 0xc4,
    DateYear = 0xc8,
    MfdBrightness = 0xb1,
    LedBrightness = 0xb2,
}

impl Opcode {
    /// Value for the control transfer's `wIndex`
    pub fn index(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::PrimaryClock => "primary clock",
            Opcode::DateDayMonth => "date day/month",
            Opcode::DateYear => "date year",
            Opcode::MfdBrightness => "MFD brightness",
            Opcode::LedBrightness => "LED brightness",
        };
        write!(f, "{} ({:#04x})", name, self.index())
    }
}

/// A single command to issue within one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolCommand {
    pub opcode: Opcode,
    pub value: u16,
}

impl ProtocolCommand {
    pub fn new(opcode: Opcode, value: u16) -> Self {
        Self { opcode, value }
    }
}

/// Acquires the control interface of a freshly attached device
pub trait ChannelProvider: Send + Sync {
    fn acquire(&self, device: &UsbDeviceInfo) -> Result<Box<dyn ControlChannel>, AccessError>;
}

/// Long-lived handle on one physical device
///
/// Dropping the channel releases the device.
pub trait ControlChannel: fmt::Debug + Send {
    /// Request exclusive access for the duration of one tick
    ///
    /// Access already held exclusively by someone else still counts as
    /// usable, since we only ever write.
    fn open(&mut self) -> Result<Box<dyn OpenChannel + '_>, AccessError>;
}

/// Scoped access obtained from [`ControlChannel::open`]
///
/// Dropping it closes the channel, so every exit path of a tick closes
/// exactly once.
pub trait OpenChannel {
    fn write(&mut self, command: ProtocolCommand) -> Result<(), TransferError>;
}
