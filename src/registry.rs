// SPDX-License-Identifier: GPL-3.0-only
//! Session table and device lifecycle
//!
//! The registry is driven by a single dispatch loop, so the table is only
//! ever touched from one place. Per device:
//!
//! ```text
//! Attached ──> Creating ──acquire ok──> Active ──Terminated──> Terminating ──> Destroyed
//!                  └─────acquire failed──────────────────────────────────────────┘
//! ```
//!
//! The registry itself never reaches a terminal state; it keeps accepting
//! attach events for as long as the process runs.

use std::collections::HashMap;

use crate::hotplug::{DeviceId, HostEvent, UsbDeviceInfo};
use crate::session::{DaemonContext, DeviceSession, SessionState};

pub struct DeviceRegistry {
    ctx: DaemonContext,
    sessions: HashMap<DeviceId, DeviceSession>,
}

impl DeviceRegistry {
    pub fn new(ctx: DaemonContext) -> Self {
        Self {
            ctx,
            sessions: HashMap::new(),
        }
    }

    /// Apply one host notification
    pub async fn handle(&mut self, event: HostEvent) {
        match event {
            HostEvent::Attached(info) => {
                self.attach(info).await;
            }
            HostEvent::Terminated(id) => {
                self.detach(&id).await;
            }
        }
    }

    /// Create a session for a newly attached device
    ///
    /// A repeated attach of the same attachment is ignored. If the device
    /// shows up at a new bus address its old session is stale (the detach
    /// was missed) and gets replaced. Returns the state the device ended up in.
    pub async fn attach(&mut self, info: UsbDeviceInfo) -> SessionState {
        let existing = self
            .sessions
            .get(&info.id)
            .map(|session| (session.state(), session.is_attached_at(&info)));

        match existing {
            Some((state, true)) => {
                debug!("{} already has a session, ignoring attach", info.id);
                return state;
            }
            Some((_, false)) => {
                info!(
                    "{} reappeared at bus {} address {}, replacing its session",
                    info.id, info.bus, info.address
                );
                self.detach(&info.id).await;
            }
            None => {}
        }

        match DeviceSession::create(&info, &self.ctx) {
            Ok(session) => {
                let state = session.state();
                self.sessions.insert(info.id, session);
                info!(
                    "{} device(s) active, {} watched for removal",
                    self.sessions.len(),
                    self.ctx.watch.len()
                );
                state
            }
            Err(e) => {
                warn!("Discarding {}: {}", info.id, e);
                SessionState::Destroyed
            }
        }
    }

    /// Tear down the session for a device that went away
    ///
    /// Unknown devices (including a repeated termination) are ignored.
    pub async fn detach(&mut self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some(mut session) => {
                let report = session.terminate().await;
                if report.ticker_cancelled && !report.channel_released {
                    warn!("{}: ticker had already stopped, channel went down with it", id);
                }
                if !report.subscription_released {
                    debug!("{} was running without a termination subscription", id);
                }
                true
            }
            None => {
                debug!("No session for {}, ignoring termination", id);
                false
            }
        }
    }

    /// Terminate every session, letting in-flight ticks finish
    pub async fn shutdown(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            session.terminate().await;
        }
        if !self.ctx.watch.is_empty() {
            warn!(
                "{} termination subscription(s) outlived their sessions",
                self.ctx.watch.len()
            );
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{SharedLog, test_context, test_device};
    use std::time::Duration;

    #[tokio::test]
    async fn test_attach_creates_one_session() {
        let log = SharedLog::default();
        let mut registry = DeviceRegistry::new(test_context(&log));

        assert_eq!(registry.attach(test_device("/sys/a")).await, SessionState::Active);
        assert_eq!(registry.attach(test_device("/sys/a")).await, SessionState::Active);

        assert_eq!(registry.len(), 1);
        assert_eq!(log.lock().unwrap().acquires, 1);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_acquire_is_discarded() {
        let log = SharedLog::default();
        log.lock().unwrap().fail_acquire = true;
        let mut registry = DeviceRegistry::new(test_context(&log));

        assert_eq!(registry.attach(test_device("/sys/a")).await, SessionState::Destroyed);
        assert!(registry.is_empty());

        // A later attach of the same device is tried again
        log.lock().unwrap().fail_acquire = false;
        assert_eq!(registry.attach(test_device("/sys/a")).await, SessionState::Active);
        assert_eq!(log.lock().unwrap().acquires, 2);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_termination_and_duplicate() {
        let log = SharedLog::default();
        let ctx = test_context(&log);
        let mut registry = DeviceRegistry::new(ctx.clone());

        registry.handle(HostEvent::Attached(test_device("/sys/a"))).await;
        registry.handle(HostEvent::Attached(test_device("/sys/b"))).await;
        assert_eq!(registry.len(), 2);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(registry.detach("/sys/a").await);
        assert_eq!(registry.len(), 1);
        assert!(!ctx.watch.is_watched("/sys/a"));
        assert!(ctx.watch.is_watched("/sys/b"));
        assert_eq!(log.lock().unwrap().releases, 1);

        assert!(!registry.detach("/sys/a").await);
        registry.handle(HostEvent::Terminated("/sys/a".to_string())).await;
        assert_eq!(log.lock().unwrap().releases, 1);

        registry.shutdown().await;
        assert!(registry.is_empty());
        assert_eq!(log.lock().unwrap().releases, 2);
        assert_eq!(ctx.watch.len(), 0);
    }

    #[tokio::test]
    async fn test_reattach_after_termination() {
        let log = SharedLog::default();
        let mut registry = DeviceRegistry::new(test_context(&log));

        registry.attach(test_device("/sys/a")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.detach("/sys/a").await;
        assert_eq!(registry.attach(test_device("/sys/a")).await, SessionState::Active);

        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.shutdown().await;

        let log = log.lock().unwrap();
        assert_eq!(log.acquires, 2);
        assert_eq!(log.releases, 2);
        // A fresh session starts with an empty cache and rewrites everything
        assert!(log.writes.len() >= 10);
    }

    #[tokio::test]
    async fn test_new_address_replaces_stale_session() {
        let log = SharedLog::default();
        let ctx = test_context(&log);
        let mut registry = DeviceRegistry::new(ctx.clone());

        registry.attach(test_device("/sys/a")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let mut replugged = test_device("/sys/a");
        replugged.address += 1;
        assert_eq!(registry.attach(replugged.clone()).await, SessionState::Active);
        assert_eq!(registry.len(), 1);
        assert!(ctx.watch.is_watched("/sys/a"));
        {
            let log = log.lock().unwrap();
            assert_eq!(log.acquires, 2);
            assert_eq!(log.releases, 1);
        }

        // The same attachment again is still a duplicate
        assert_eq!(registry.attach(replugged).await, SessionState::Active);
        assert_eq!(log.lock().unwrap().acquires, 2);

        registry.shutdown().await;
        assert!(ctx.watch.is_empty());
    }
}
