use tokio::sync::{mpsc, oneshot};

use crate::error::SubscriptionError;

use super::udev_monitor::{EventFilter, UdevMonitor};
use super::{HostEvent, TerminationWatch};

/// Capacity of the event channel between the monitor thread and the registry
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Receiving end of the host's device notifications
pub struct DeviceNotifications {
    /// Attach/termination events, in the order udev reported them
    pub events: mpsc::Receiver<HostEvent>,
    /// Termination subscriptions; a removal of a subscribed device is always reported
    pub watch: TerminationWatch,
}

/// Start watching for X52 Pro attach and detach events
///
/// Uses a dedicated blocking thread for udev monitoring because MonitorSocket is not Send.
/// The monitor socket is created before existing devices are enumerated, so a
/// device plugged in during startup is announced at least once; the registry
/// ignores the duplicate. Fails if the monitor cannot be created, which leaves
/// the daemon unable to discover devices at all.
pub async fn device_subscription() -> Result<DeviceNotifications, SubscriptionError> {
    let watch = TerminationWatch::default();
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (ready_tx, ready_rx) = oneshot::channel();

    let thread_watch = watch.clone();
    std::thread::Builder::new()
        .name("usb-hotplug".to_string())
        .spawn(move || {
            let monitor = match UdevMonitor::new() {
                Ok(m) => m,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            let mut filter = EventFilter::new(thread_watch.clone());
            match UdevMonitor::enumerate_present() {
                Ok(present) => {
                    for info in present {
                        info!("Found attached device at {}", info.id);
                        filter.note_attached(&info);
                        if tx.blocking_send(HostEvent::Attached(info)).is_err() {
                            thread_watch.close();
                            return;
                        }
                    }
                }
                Err(e) => warn!("Failed to enumerate attached USB devices: {}", e),
            }

            if let Err(e) = monitor.run(&mut filter, &tx) {
                error!("USB hotplug monitoring stopped: {}", e);
            }
            thread_watch.close();
        })?;

    ready_rx.await.map_err(|_| SubscriptionError::Closed)??;

    Ok(DeviceNotifications { events: rx, watch })
}
