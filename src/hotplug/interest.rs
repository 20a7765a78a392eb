// SPDX-License-Identifier: GPL-3.0-only
//! Termination-interest subscriptions
//!
//! Remove events carry little more than a sysfs path, so besides the devices
//! it announced itself the monitor thread forwards them only for devices
//! someone registered interest in. Each
//! registration is represented by a [`TerminationToken`]; dropping the token
//! releases it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::SubscriptionError;

use super::DeviceId;

#[derive(Debug, Default)]
struct WatchState {
    devices: HashSet<DeviceId>,
    closed: bool,
}

/// Shared table of devices whose removal should be reported
#[derive(Debug, Clone, Default)]
pub struct TerminationWatch {
    state: Arc<Mutex<WatchState>>,
}

impl TerminationWatch {
    fn lock(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in the removal of `id`
    pub fn subscribe(&self, id: &str) -> Result<TerminationToken, SubscriptionError> {
        let mut state = self.lock();
        if state.closed {
            return Err(SubscriptionError::Closed);
        }
        if !state.devices.insert(id.to_string()) {
            return Err(SubscriptionError::AlreadyWatched(id.to_string()));
        }

        Ok(TerminationToken {
            id: id.to_string(),
            watch: self.clone(),
        })
    }

    pub fn is_watched(&self, id: &str) -> bool {
        self.lock().devices.contains(id)
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().devices.is_empty()
    }

    /// Mark the notification source as gone; later subscriptions fail
    pub fn close(&self) {
        self.lock().closed = true;
    }
}

/// A live termination subscription for one device
#[derive(Debug)]
pub struct TerminationToken {
    id: DeviceId,
    watch: TerminationWatch,
}

impl TerminationToken {
    pub fn device(&self) -> &str {
        &self.id
    }
}

impl Drop for TerminationToken {
    fn drop(&mut self) {
        self.watch.lock().devices.remove(&self.id);
        debug!("Released termination subscription for {}", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_and_release() {
        let watch = TerminationWatch::default();
        let token = watch.subscribe("/sys/devices/usb1/1-1").expect("subscribe failed");
        assert!(watch.is_watched("/sys/devices/usb1/1-1"));
        assert_eq!(token.device(), "/sys/devices/usb1/1-1");

        drop(token);
        assert!(!watch.is_watched("/sys/devices/usb1/1-1"));
        assert_eq!(watch.len(), 0);
        assert!(watch.is_empty());
    }

    #[test]
    fn test_duplicate_subscription_rejected() {
        let watch = TerminationWatch::default();
        let _token = watch.subscribe("dev-a").expect("subscribe failed");

        match watch.subscribe("dev-a") {
            Err(SubscriptionError::AlreadyWatched(id)) => assert_eq!(id, "dev-a"),
            other => panic!("expected AlreadyWatched, got {:?}", other),
        }
        assert_eq!(watch.len(), 1);
    }

    #[test]
    fn test_closed_watch_rejects_subscriptions() {
        let watch = TerminationWatch::default();
        watch.close();
        assert!(matches!(watch.subscribe("dev-a"), Err(SubscriptionError::Closed)));
    }
}
