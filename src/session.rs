// SPDX-License-Identifier: GPL-3.0-only
//! Per-device synchronization session
//!
//! A session owns everything belonging to one attached X52 Pro: the control
//! channel, the cache of last written values, the 1 Hz ticker and the
//! termination subscription.
//!
//! # Tick
//!
//! Each tick opens the channel, takes one time snapshot and one preference
//! read, encodes the five commands and writes only those whose value differs
//! from the last successful write. The channel is closed when the open guard
//! goes out of scope, whatever happened in between.
//!
//! # Concurrency
//!
//! The tick runs on the blocking pool while the ticker task awaits it, so a
//! session never has two ticks in flight. The worker (channel plus cache) is
//! moved into the blocking call and handed back afterwards; on teardown the
//! ticker returns it only after the in-flight tick finished, which is what
//! lets the channel be released strictly after the ticker stopped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::{Clock, TimeSnapshot};
use crate::config::{ConfigSource, Preferences};
use crate::error::AccessError;
use crate::hotplug::{DeviceId, TerminationToken, TerminationWatch, UsbDeviceInfo};
use crate::protocols::encoder::{encode_day_month, encode_time};
use crate::protocols::{ChannelProvider, ControlChannel, Opcode, ProtocolCommand};

/// Interval between two ticks of a session
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Everything a session needs from the process, passed explicitly
#[derive(Clone)]
pub struct DaemonContext {
    pub channels: Arc<dyn ChannelProvider>,
    pub config: Arc<dyn ConfigSource>,
    pub clock: Arc<dyn Clock>,
    pub watch: TerminationWatch,
    pub tick_period: Duration,
}

/// Lifecycle of a session as seen from the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Attach matched, channel not yet acquired
    Creating,
    /// Ticker running
    Active,
    /// Teardown in progress
    Terminating,
    /// All resources released; terminal
    Destroyed,
}

/// Last successfully written value per opcode; `None` means unknown
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncCache {
    pub time: Option<u16>,
    pub day_month: Option<u16>,
    pub year: Option<u16>,
    pub mfd_brightness: Option<u16>,
    pub led_brightness: Option<u16>,
}

impl SyncCache {
    fn slot_mut(&mut self, opcode: Opcode) -> &mut Option<u16> {
        match opcode {
            Opcode::PrimaryClock => &mut self.time,
            Opcode::DateDayMonth => &mut self.day_month,
            Opcode::DateYear => &mut self.year,
            Opcode::MfdBrightness => &mut self.mfd_brightness,
            Opcode::LedBrightness => &mut self.led_brightness,
        }
    }
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The channel could not be opened; nothing was written
    Skipped,
    Completed { written: usize, failed: usize },
}

/// Compute the full desired device state for one instant
pub fn desired_commands(now: &TimeSnapshot, prefs: &Preferences) -> [ProtocolCommand; 5] {
    let time = encode_time(now.hour, now.minute, prefs.clock_mode.is_24_hour());
    let (day_month, year) = encode_day_month(Some(prefs.date_format.as_str()), now.day, now.month, now.year);

    [
        ProtocolCommand::new(Opcode::PrimaryClock, time),
        ProtocolCommand::new(Opcode::DateDayMonth, day_month),
        ProtocolCommand::new(Opcode::DateYear, year),
        ProtocolCommand::new(Opcode::MfdBrightness, prefs.mfd_brightness),
        ProtocolCommand::new(Opcode::LedBrightness, prefs.led_brightness),
    ]
}

/// The state a tick works on: channel, cache and the inputs it reads
pub struct SyncWorker {
    id: DeviceId,
    channel: Box<dyn ControlChannel>,
    cache: SyncCache,
    config: Arc<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    access_hint_logged: bool,
}

impl fmt::Debug for SyncWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncWorker")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("cache", &self.cache)
            .finish()
    }
}

impl SyncWorker {
    pub fn new(
        id: DeviceId,
        channel: Box<dyn ControlChannel>,
        config: Arc<dyn ConfigSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id,
            channel,
            cache: SyncCache::default(),
            config,
            clock,
            access_hint_logged: false,
        }
    }

    pub fn cache(&self) -> &SyncCache {
        &self.cache
    }

    /// Run one synchronization pass
    pub fn tick(&mut self) -> TickOutcome {
        let mut open = match self.channel.open() {
            Ok(open) => open,
            Err(e) => {
                warn!("Skipping tick for {}: {}", self.id, e);
                if matches!(e, AccessError::Denied { .. }) && !self.access_hint_logged {
                    warn!(
                        "This may be a permissions issue. On Linux, ensure udev rules grant access to the device."
                    );
                    self.access_hint_logged = true;
                }
                return TickOutcome::Skipped;
            }
        };

        let now = self.clock.now();
        let prefs = self.config.load();

        let mut written = 0;
        let mut failed = 0;

        for command in desired_commands(&now, &prefs) {
            let last = self.cache.slot_mut(command.opcode);
            if *last == Some(command.value) {
                continue;
            }

            match open.write(command) {
                Ok(()) => {
                    *last = Some(command.value);
                    written += 1;
                    trace!("{}: wrote {} = {:#06x}", self.id, command.opcode, command.value);
                }
                Err(e) => {
                    failed += 1;
                    warn!("{}: {}", self.id, e);
                }
            }
        }

        TickOutcome::Completed { written, failed }
    }

    fn into_channel(self) -> Box<dyn ControlChannel> {
        self.channel
    }
}

/// The running 1 Hz task of a session
struct Ticker {
    stop: oneshot::Sender<()>,
    task: JoinHandle<Option<SyncWorker>>,
}

impl Ticker {
    fn start(worker: SyncWorker, period: Duration) -> Self {
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_ticker(worker, period, stop_rx));
        Self { stop, task }
    }

    /// Stop ticking and wait for the in-flight tick, returning the worker
    async fn cancel(self) -> Option<SyncWorker> {
        let _ = self.stop.send(());
        match self.task.await {
            Ok(worker) => worker,
            Err(e) => {
                error!("Ticker task failed: {}", e);
                None
            }
        }
    }
}

async fn run_ticker(
    mut worker: SyncWorker,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
) -> Option<SyncWorker> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            // Also fires when the sender is dropped with the session
            _ = &mut stop => return Some(worker),
            _ = interval.tick() => {
                let result = tokio::task::spawn_blocking(move || {
                    let outcome = worker.tick();
                    (worker, outcome)
                })
                .await;

                match result {
                    Ok((back, outcome)) => {
                        if let TickOutcome::Completed { written, failed } = outcome {
                            if written > 0 || failed > 0 {
                                debug!("{}: tick wrote {}, failed {}", back.id, written, failed);
                            }
                        }
                        worker = back;
                    }
                    Err(e) => {
                        error!("Tick panicked, stopping session ticker: {}", e);
                        return None;
                    }
                }
            }
        }
    }
}

/// What teardown released, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Teardown {
    pub ticker_cancelled: bool,
    pub channel_released: bool,
    pub subscription_released: bool,
}

/// One attached device
pub struct DeviceSession {
    id: DeviceId,
    /// Bus number and address the channel was acquired at
    location: (u8, u8),
    state: SessionState,
    ticker: Option<Ticker>,
    termination: Option<TerminationToken>,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("state", &self.state)
            .field("subscribed", &self.termination.is_some())
            .finish()
    }
}

impl DeviceSession {
    /// Acquire the device and start ticking
    ///
    /// Must be called from within a Tokio runtime. If the channel cannot be
    /// acquired the session never becomes active and no ticker is started.
    /// A failed termination subscription is logged and the session runs
    /// anyway, it just won't see the detach.
    pub fn create(info: &UsbDeviceInfo, ctx: &DaemonContext) -> Result<Self, AccessError> {
        debug!("Creating session for {} ({:?})", info.id, SessionState::Creating);

        let channel = ctx.channels.acquire(info)?;

        let worker = SyncWorker::new(
            info.id.clone(),
            channel,
            Arc::clone(&ctx.config),
            Arc::clone(&ctx.clock),
        );
        let ticker = Ticker::start(worker, ctx.tick_period);

        let termination = match ctx.watch.subscribe(&info.id) {
            Ok(token) => Some(token),
            Err(e) => {
                error!("{}: termination subscription failed, detach will go unnoticed: {}", info.id, e);
                None
            }
        };

        let name = info.spec().map(|spec| spec.name).unwrap_or("device");
        info!("{} at {} is active", name, info.id);

        Ok(Self {
            id: info.id.clone(),
            location: (info.bus, info.address),
            state: SessionState::Active,
            ticker: Some(ticker),
            termination,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether `info` describes the attachment this session was created for
    ///
    /// The kernel hands out a new address on every enumeration, so a
    /// different one means the device was unplugged and came back.
    pub fn is_attached_at(&self, info: &UsbDeviceInfo) -> bool {
        self.location == (info.bus, info.address)
    }

    /// Tear the session down: cancel ticker, release channel, release subscription
    ///
    /// The ticker is awaited before the channel is dropped, so an in-flight
    /// tick always finishes with the channel it opened. Calling this again
    /// is a no-op.
    pub async fn terminate(&mut self) -> Teardown {
        let mut report = Teardown {
            ticker_cancelled: false,
            channel_released: false,
            subscription_released: false,
        };

        if self.state == SessionState::Destroyed {
            return report;
        }
        self.state = SessionState::Terminating;

        if let Some(ticker) = self.ticker.take() {
            let worker = ticker.cancel().await;
            report.ticker_cancelled = true;

            if let Some(worker) = worker {
                debug!("{}: last written state {:?}", self.id, worker.cache());
                drop(worker.into_channel());
                report.channel_released = true;
            }
        }

        if let Some(token) = self.termination.take() {
            debug!("Releasing termination subscription for {}", token.device());
            drop(token);
            report.subscription_released = true;
        }

        self.state = SessionState::Destroyed;
        info!("Session for {} destroyed", self.id);
        report
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        // Without terminate(): the ticker sees its stop sender go away and
        // drops the worker once the current tick is done.
        if self.ticker.is_some() {
            debug!("Session for {} dropped while active", self.id);
        }
    }
}
