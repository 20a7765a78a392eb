// SPDX-License-Identifier: GPL-3.0-only
//! Error types for the daemon
//!
//! Device-level failures (`AccessError`, `TransferError`) are recovered inside
//! the tick that produced them and only ever reach the log. `SubscriptionError`
//! is fatal when it concerns the attach monitor and degrades a single session
//! when it concerns a termination subscription.

use thiserror::Error;

use crate::hotplug::DeviceId;
use crate::protocols::Opcode;

/// Failure to obtain a usable handle on the device's control interface
#[derive(Error, Debug)]
pub enum AccessError {
    /// The device disappeared between notification and acquisition
    #[error("device {0} is no longer present on the bus")]
    NotFound(DeviceId),

    /// The host refused access outright (not merely shared)
    #[error("access to device {device} denied: {source}")]
    Denied {
        device: DeviceId,
        #[source]
        source: rusb::Error,
    },
}

/// A single vendor control transfer failed
#[derive(Error, Debug)]
#[error("control transfer {opcode} failed: {status}")]
pub struct TransferError {
    pub opcode: Opcode,
    pub status: rusb::Error,
}

/// Failure to register for device notifications
#[derive(Error, Debug)]
pub enum SubscriptionError {
    /// The udev monitor socket could not be set up
    #[error("failed to create udev monitor: {0}")]
    Monitor(#[from] std::io::Error),

    /// Termination interest is already registered for this device
    #[error("device {0} is already being watched")]
    AlreadyWatched(DeviceId),

    /// The notification thread has stopped
    #[error("device notification source has shut down")]
    Closed,
}

/// Top-level daemon error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// libusb could not be initialised
    #[error("USB context error: {0}")]
    Usb(#[from] rusb::Error),
}

/// Result type alias for AppError
pub type Result<T> = std::result::Result<T, AppError>;
