// SPDX-License-Identifier: GPL-3.0-only
//! Host local time

use chrono::{Datelike, Local, NaiveDateTime, Timelike};

/// One consistent reading of the host's local wall clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSnapshot {
    pub year: u16,
    /// 1-12
    pub month: u8,
    /// 1-31
    pub day: u8,
    /// 0-23
    pub hour: u8,
    /// 0-59
    pub minute: u8,
}

impl From<NaiveDateTime> for TimeSnapshot {
    fn from(time: NaiveDateTime) -> Self {
        Self {
            year: u16::try_from(time.year()).unwrap_or_default(),
            month: time.month() as u8,
            day: time.day() as u8,
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }
}

/// Source of the current local time
pub trait Clock: Send + Sync {
    fn now(&self) -> TimeSnapshot;
}

/// The host's local timezone clock
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> TimeSnapshot {
        Local::now().naive_local().into()
    }
}
