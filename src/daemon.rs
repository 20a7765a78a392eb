// SPDX-License-Identifier: GPL-3.0-only
//! Clock synchronization daemon
//!
//! Owns the process context (USB access, preferences, clock, notification
//! subscriptions) and runs the single dispatch loop that feeds host
//! notifications into the [`DeviceRegistry`].
//!
//! Supports:
//! - Any number of X52 Pro units, each with its own session
//! - Devices attached before startup and hot-plugged later
//! - Cooperative shutdown that lets in-flight ticks finish

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::clock::LocalClock;
use crate::config::ConfigSource;
use crate::error::Result;
use crate::hotplug::{HostEvent, device_subscription};
use crate::protocols::usb_control::UsbChannelProvider;
use crate::registry::DeviceRegistry;
use crate::session::{DaemonContext, TICK_PERIOD};

/// Why the dispatch loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The shutdown future resolved
    Interrupted,
    /// The notification source went away
    NotificationsClosed,
}

pub struct ClockSyncDaemon {
    registry: DeviceRegistry,
    events: mpsc::Receiver<HostEvent>,
}

impl ClockSyncDaemon {
    /// Set up USB access and device notifications
    ///
    /// Failing to create the udev monitor is fatal: without it no device
    /// would ever be discovered.
    pub async fn new(config: impl ConfigSource + 'static) -> Result<Self> {
        let channels = UsbChannelProvider::new()?;
        let notifications = device_subscription().await?;

        let ctx = DaemonContext {
            channels: Arc::new(channels),
            config: Arc::new(config),
            clock: Arc::new(LocalClock),
            watch: notifications.watch,
            tick_period: TICK_PERIOD,
        };

        Ok(Self::with_parts(DeviceRegistry::new(ctx), notifications.events))
    }

    pub fn with_parts(registry: DeviceRegistry, events: mpsc::Receiver<HostEvent>) -> Self {
        Self { registry, events }
    }

    /// Dispatch notifications until `shutdown` resolves or the source closes
    ///
    /// All sessions are terminated before returning.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Exit {
        info!("Watching for X52 Pro devices");
        tokio::pin!(shutdown);

        let exit = loop {
            tokio::select! {
                _ = &mut shutdown => break Exit::Interrupted,
                event = self.events.recv() => match event {
                    Some(event) => self.registry.handle(event).await,
                    None => {
                        error!("Device notification channel closed");
                        break Exit::NotificationsClosed;
                    }
                },
            }
        };

        if exit == Exit::Interrupted {
            info!("Interrupted, exiting.");
        }

        if !self.registry.is_empty() {
            let remaining = self.registry.len();
            self.registry.shutdown().await;
            debug!("Terminated {} session(s)", remaining);
        }

        exit
    }
}
