use std::collections::HashSet;
use std::io;
use std::os::fd::AsRawFd;

use tokio::sync::mpsc;

use super::{DeviceId, HostEvent, TerminationWatch, UsbDeviceInfo};

/// How long a poll waits before checking whether anyone is still listening
const POLL_TIMEOUT_MS: libc::c_int = 500;

/// Monitors udev for USB device hotplug events
///
/// This runs in a dedicated blocking thread because udev's MonitorSocket is not Send.
/// It uses libc::poll() to wait for events on the udev socket.
pub struct UdevMonitor {
    socket: udev::MonitorSocket,
}

impl UdevMonitor {
    /// Create a new udev monitor for whole USB devices
    ///
    /// Filtering on the `usb_device` devtype skips the per-interface events
    /// every attach also produces.
    pub fn new() -> Result<Self, io::Error> {
        let socket = udev::MonitorBuilder::new()?
            .match_subsystem_devtype("usb", "usb_device")?
            .listen()?;

        Ok(Self { socket })
    }

    /// List matching devices that were attached before the monitor started
    pub fn enumerate_present() -> Result<Vec<UsbDeviceInfo>, io::Error> {
        let mut enumerator = udev::Enumerator::new()?;
        enumerator.match_subsystem("usb")?;
        enumerator.match_property("DEVTYPE", "usb_device")?;

        Ok(enumerator
            .scan_devices()?
            .filter_map(|device| UsbDeviceInfo::from_udev(&device))
            .filter(|info| info.spec().is_some())
            .collect())
    }

    /// Run the monitoring loop, forwarding translated events to `tx`
    ///
    /// Blocks until the receiving side is dropped (`Ok`) or polling fails.
    pub fn run(self, filter: &mut EventFilter, tx: &mpsc::Sender<HostEvent>) -> io::Result<()> {
        info!("USB hotplug monitoring started (usb subsystem, usb_device devtype)");

        let fd = self.socket.as_raw_fd();

        loop {
            if tx.is_closed() {
                info!("Event receiver dropped, stopping USB hotplug monitoring");
                return Ok(());
            }

            let mut poll_fd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };

            let poll_result = unsafe { libc::poll(&mut poll_fd, 1, POLL_TIMEOUT_MS) };

            if poll_result < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!("Poll error: {}", err);
                return Err(err);
            }

            if poll_result == 0 {
                continue;
            }

            for event in self.socket.iter() {
                let device = event.device();
                let syspath = device.syspath().to_string_lossy().into_owned();

                debug!("udev event: type={:?}, syspath={}", event.event_type(), syspath);

                let translated =
                    filter.translate(event.event_type(), &syspath, UsbDeviceInfo::from_udev(&device));

                if let Some(host_event) = translated {
                    info!("Device event: {:?}", host_event);
                    if tx.blocking_send(host_event).is_err() {
                        info!("Event receiver dropped, stopping USB hotplug monitoring");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Decides which raw udev events the registry cares about
///
/// Every device announced as attached is remembered until its removal, so a
/// remove is forwarded even when it arrives before the registry got around to
/// creating the session and subscribing. Removals of anything else are only
/// forwarded if a termination subscription exists for them.
#[derive(Debug)]
pub struct EventFilter {
    attached: HashSet<DeviceId>,
    watch: TerminationWatch,
}

impl EventFilter {
    pub fn new(watch: TerminationWatch) -> Self {
        Self {
            attached: HashSet::new(),
            watch,
        }
    }

    /// Record a device announced outside the event stream (startup enumeration)
    pub fn note_attached(&mut self, info: &UsbDeviceInfo) {
        self.attached.insert(info.id.clone());
    }

    fn translate(
        &mut self,
        kind: udev::EventType,
        syspath: &str,
        info: Option<UsbDeviceInfo>,
    ) -> Option<HostEvent> {
        match kind {
            udev::EventType::Add => {
                let info = info.filter(|info| info.spec().is_some())?;
                self.note_attached(&info);
                Some(HostEvent::Attached(info))
            }
            udev::EventType::Remove => {
                let announced = self.attached.remove(syspath);
                if announced || self.watch.is_watched(syspath) {
                    Some(HostEvent::Terminated(syspath.to_string()))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRegistry;
    use crate::session::tests::{SharedLog, test_context, test_device};

    fn x52(id: &str) -> UsbDeviceInfo {
        UsbDeviceInfo {
            id: id.to_string(),
            vendor_id: 0x06a3,
            product_id: 0x0762,
            bus: 1,
            address: 4,
            serial: None,
        }
    }

    #[test]
    fn test_add_of_matching_device() {
        let mut filter = EventFilter::new(TerminationWatch::default());
        let event = filter.translate(udev::EventType::Add, "/sys/x", Some(x52("/sys/x")));
        assert_eq!(event, Some(HostEvent::Attached(x52("/sys/x"))));
    }

    #[test]
    fn test_add_of_other_device_ignored() {
        let mut filter = EventFilter::new(TerminationWatch::default());
        let mut other = x52("/sys/y");
        other.vendor_id = 0x046d;
        assert_eq!(filter.translate(udev::EventType::Add, "/sys/y", Some(other)), None);
        assert_eq!(filter.translate(udev::EventType::Add, "/sys/y", None), None);
        assert_eq!(filter.translate(udev::EventType::Remove, "/sys/y", None), None);
    }

    #[test]
    fn test_remove_only_for_known_devices() {
        let watch = TerminationWatch::default();
        let mut filter = EventFilter::new(watch.clone());
        assert_eq!(filter.translate(udev::EventType::Remove, "/sys/x", None), None);

        let token = watch.subscribe("/sys/x").expect("subscribe failed");
        assert_eq!(
            filter.translate(udev::EventType::Remove, "/sys/x", None),
            Some(HostEvent::Terminated("/sys/x".to_string()))
        );

        drop(token);
        assert_eq!(filter.translate(udev::EventType::Remove, "/sys/x", None), None);
    }

    #[test]
    fn test_remove_of_announced_device_before_subscription() {
        let mut filter = EventFilter::new(TerminationWatch::default());
        filter.translate(udev::EventType::Add, "/sys/x", Some(x52("/sys/x")));

        assert_eq!(
            filter.translate(udev::EventType::Remove, "/sys/x", None),
            Some(HostEvent::Terminated("/sys/x".to_string()))
        );
        // Forgotten once removed
        assert_eq!(filter.translate(udev::EventType::Remove, "/sys/x", None), None);

        filter.note_attached(&x52("/sys/z"));
        assert_eq!(
            filter.translate(udev::EventType::Remove, "/sys/z", None),
            Some(HostEvent::Terminated("/sys/z".to_string()))
        );
    }

    #[test]
    fn test_change_events_ignored() {
        let watch = TerminationWatch::default();
        let mut filter = EventFilter::new(watch.clone());
        let _token = watch.subscribe("/sys/x").expect("subscribe failed");
        assert_eq!(
            filter.translate(udev::EventType::Change, "/sys/x", Some(x52("/sys/x"))),
            None
        );
    }

    #[tokio::test]
    async fn test_quick_unplug_reaches_registry() {
        let log = SharedLog::default();
        let ctx = test_context(&log);
        let mut filter = EventFilter::new(ctx.watch.clone());
        let mut registry = DeviceRegistry::new(ctx.clone());

        // Both events are queued before the registry sees the attach
        let attached = filter
            .translate(udev::EventType::Add, "/sys/a", Some(test_device("/sys/a")))
            .expect("attach forwarded");
        let removed = filter
            .translate(udev::EventType::Remove, "/sys/a", None)
            .expect("remove forwarded");

        registry.handle(attached).await;
        registry.handle(removed).await;
        assert!(registry.is_empty());
        assert_eq!(ctx.watch.len(), 0);

        let reattached = filter
            .translate(udev::EventType::Add, "/sys/a", Some(test_device("/sys/a")))
            .expect("attach forwarded");
        registry.handle(reattached).await;
        assert_eq!(registry.len(), 1);

        registry.shutdown().await;
        let log = log.lock().unwrap();
        assert_eq!(log.acquires, 2);
        assert_eq!(log.releases, 2);
    }
}
