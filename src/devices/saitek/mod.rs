// SPDX-License-Identifier: GPL-3.0-only
//! Saitek (now Logitech/Mad Catz) devices

pub mod x52_pro;

/// Saitek USB Vendor ID
pub const VENDOR_ID: u16 = 0x06a3;
