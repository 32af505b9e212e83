//! Fingerprint verification session
//!
//! A [`Session`] drives the fingerprint daemon for one lock screen. The
//! caller polls [`Session::verify`]; each poll drains whatever asynchronous
//! completions have arrived, then advances the state machine:
//! bootstrap, acquire the device, start verification, classify status
//! signals, and retry, restart, disable or succeed.
//!
//! Remote calls run as spawned tasks and report back over a channel. Every
//! report carries the epoch captured when its call was issued; reports from
//! an older epoch are dropped on arrival, so a restart or teardown silently
//! neutralises everything still in flight.

mod acquire;
mod bootstrap;
mod health;
mod restart;
mod verify;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fingerlock_core::{
    Clock, Epoch, EpochGuard, EpochStamp, FailureCounters, IdleRestart, ResetKind, StatusText,
};

use crate::bus::{BusConnector, DeviceSignal, FprintDevice, FprintManager, SleepSource};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::reset::{RecoveryController, ResetMode};
use crate::status::{NullSink, StatusSink, StatusSurface};

/// External collaborators a session is wired to
#[derive(Clone)]
pub struct Collaborators {
    /// Opens the bus connection and the daemon's manager object
    pub connector: Arc<dyn BusConnector>,
    /// Process-wide device recovery
    pub recovery: Arc<RecoveryController>,
    /// Wall-clock source for idle and activity decisions
    pub clock: Arc<dyn Clock>,
    /// Sleep/resume notifications, if available
    pub sleep: Option<Arc<dyn SleepSource>>,
}

/// Phase flags encoding the state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseFlags {
    /// Bootstrap ran since the last teardown
    pub initialized: bool,
    /// A verification round is in progress
    pub verifying: bool,
    /// The daemon acknowledged `VerifyStart`
    pub started: bool,
    /// The current round reached a terminal result
    pub completed: bool,
    /// The last terminal result was a match
    pub matched: bool,
    /// A staggered restart is pending
    pub restarting: bool,
    /// Device acquisition is in flight
    pub claiming: bool,
    /// The device's signals are subscribed
    pub signal_connected: bool,
    /// The pending restart should power-cycle the reader
    pub rebind_device: bool,
}

/// Wall-clock timestamps used for idle decisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamps {
    /// Last status signal (refreshed on bootstrap and restart too)
    pub last_signal: Option<DateTime<Utc>>,
    /// Last `VerifyStart` attempt
    pub last_verify_start: Option<DateTime<Utc>>,
    /// Last caller activity
    pub last_activity: Option<DateTime<Utc>>,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub epoch: Epoch,
    pub phase: PhaseFlags,
    pub counters: FailureCounters,
    pub timestamps: Timestamps,
    pub idle_restart: IdleRestart,
    /// Discovery gave up or the device failed to open; waiting for an external trigger
    pub acquisition_abandoned: bool,
    /// The manager object is held
    pub connected: bool,
    /// A claimed device is held
    pub holds_device: bool,
    /// The disable policy has tripped
    pub disabled: bool,
}

/// Result of a stamped asynchronous step
pub(crate) enum Completion {
    DefaultDevice(Result<String>),
    DeviceOpened(Result<Arc<dyn FprintDevice>>),
    Claimed {
        device: Arc<dyn FprintDevice>,
        result: Result<()>,
    },
    RestartStep1,
    RestartStep2,
}

pub(crate) enum Message {
    Stamped(Epoch, Completion),
    Sleep(bool),
}

/// The fingerprint verification state machine
pub struct Session {
    config: SessionConfig,
    connector: Arc<dyn BusConnector>,
    recovery: Arc<RecoveryController>,
    clock: Arc<dyn Clock>,
    sleep_source: Option<Arc<dyn SleepSource>>,
    sink: Arc<dyn StatusSink>,

    epoch: EpochGuard,
    flags: PhaseFlags,
    counters: FailureCounters,
    timestamps: Timestamps,
    idle_restart: IdleRestart,
    acquisition_abandoned: bool,

    scan_status: StatusText,
    driver_status: StatusText,

    manager: Option<Arc<dyn FprintManager>>,
    device: Option<Arc<dyn FprintDevice>>,
    signals: Option<mpsc::UnboundedReceiver<DeviceSignal>>,

    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
    sleep_watch: Option<JoinHandle<()>>,
}

impl Session {
    /// Create an uninitialised session
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            connector: collaborators.connector,
            recovery: collaborators.recovery,
            clock: collaborators.clock,
            sleep_source: collaborators.sleep,
            sink: Arc::new(NullSink),
            epoch: EpochGuard::new(),
            flags: PhaseFlags::default(),
            counters: FailureCounters::default(),
            timestamps: Timestamps::default(),
            idle_restart: IdleRestart::None,
            acquisition_abandoned: false,
            scan_status: StatusText::default(),
            driver_status: StatusText::default(),
            manager: None,
            device: None,
            signals: None,
            tx,
            rx,
            sleep_watch: None,
        }
    }

    /// Start from a clean slate: reset counters, connect, watch for sleep
    ///
    /// Also the way to re-enable a session the disable policy switched off.
    pub async fn init(&mut self, sink: Arc<dyn StatusSink>) {
        self.close_device();
        self.manager = None;
        self.sink = sink;
        self.flags = PhaseFlags::default();
        self.counters = FailureCounters::default();
        self.timestamps = Timestamps::default();
        self.idle_restart = IdleRestart::None;
        self.acquisition_abandoned = false;
        self.scan_status = StatusText::default();
        self.driver_status = StatusText::default();

        self.bootstrap().await;
        self.watch_sleep().await;
    }

    /// Poll the state machine; true once a match has been confirmed
    pub async fn verify(&mut self) -> bool {
        let stamp = self.epoch.stamp();
        self.pump().await;
        if !stamp.is_current() || self.flags.restarting {
            return false;
        }

        let now = self.clock.now();
        let request = self.idle_restart.take();
        if request.is_pending() {
            if self.health_check(request, now).await {
                return false;
            }
        } else if self.flags.verifying
            && fingerlock_core::elapsed_since(now, self.timestamps.last_verify_start)
                >= self.config.idle_timeout()
        {
            debug!("Idle verification timeout, disabling fingerprint");
            self.deinit();
            return false;
        }

        if self.manager.is_none() {
            return false;
        }

        if self.device.is_none() {
            self.acquire();
            return false;
        }

        if !self.flags.completed {
            return false;
        }

        if !self.flags.matched {
            self.start_verify().await;
            return false;
        }

        true
    }

    /// Tear everything down; nothing happens until the next `init` or trigger
    pub fn deinit(&mut self) {
        self.teardown();
        self.flags.restarting = false;
    }

    /// Ask the health monitor to look at the session on the next poll
    ///
    /// Called on user activity. Also re-arms a device acquisition that gave up.
    pub fn set_restart_flag(&mut self, force: bool) {
        self.idle_restart = self.idle_restart.merge(force);
        self.timestamps.last_activity = Some(self.clock.now());
        self.acquisition_abandoned = false;
    }

    /// Whether the disable policy has tripped
    pub fn is_disabled(&self) -> bool {
        self.config.disable.should_disable(&self.counters)
    }

    /// User-facing scan status
    pub fn scan_status(&self) -> &str {
        self.scan_status.as_str()
    }

    /// Driver/connection status
    pub fn driver_status(&self) -> &str {
        self.driver_status.as_str()
    }

    /// Current epoch, flags and counters
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            epoch: self.epoch.current(),
            phase: self.flags,
            counters: self.counters,
            timestamps: self.timestamps,
            idle_restart: self.idle_restart,
            acquisition_abandoned: self.acquisition_abandoned,
            connected: self.manager.is_some(),
            holds_device: self.device.is_some(),
            disabled: self.is_disabled(),
        }
    }

    /// Drain every completion and signal that has already arrived
    async fn pump(&mut self) {
        loop {
            if let Ok(message) = self.rx.try_recv() {
                self.dispatch(message).await;
                continue;
            }

            let signal = match self.signals.as_mut() {
                Some(signals) => signals.try_recv().ok(),
                None => None,
            };
            match signal {
                Some(signal) => self.on_signal(signal).await,
                None => break,
            }
        }
    }

    async fn dispatch(&mut self, message: Message) {
        match message {
            Message::Sleep(going_to_sleep) => self.on_prepare_for_sleep(going_to_sleep).await,
            Message::Stamped(epoch, completion) => {
                if !self.epoch.is_current(epoch) {
                    debug!("Dropping completion from stale epoch {}", epoch);
                    return;
                }
                match completion {
                    Completion::DefaultDevice(result) => self.on_default_device(result).await,
                    Completion::DeviceOpened(result) => self.on_device_opened(result),
                    Completion::Claimed { device, result } => {
                        self.on_claimed(device, result).await
                    }
                    Completion::RestartStep1 => self.restart_step1().await,
                    Completion::RestartStep2 => self.restart_step2().await,
                }
            }
        }
    }

    async fn on_prepare_for_sleep(&mut self, going_to_sleep: bool) {
        if going_to_sleep {
            info!("System going to sleep, stopping fingerprint verification");
            self.deinit();
        } else {
            info!("System resumed, restarting fingerprint verification");
            self.deinit();
            self.recovery
                .maybe_reset(ResetKind::Soft, ResetMode::Blocking)
                .await;
            self.bootstrap().await;
        }
    }

    async fn watch_sleep(&mut self) {
        if self.sleep_watch.is_some() {
            return;
        }
        let Some(source) = self.sleep_source.clone() else {
            return;
        };

        let mut notifications = match source.subscribe().await {
            Ok(notifications) => notifications,
            Err(e) => {
                warn!("Failed to subscribe to sleep notifications: {}", e);
                return;
            }
        };

        let epoch = self.epoch.clone();
        let tx = self.tx.clone();
        self.sleep_watch = Some(tokio::spawn(async move {
            while let Some(going_to_sleep) = notifications.recv().await {
                // Abandon in-flight waits now; the session handles the event on its next poll
                epoch.bump();
                if tx.send(Message::Sleep(going_to_sleep)).is_err() {
                    break;
                }
            }
        }));
    }

    /// Run `step` after `delay` and report its completion under `stamp`
    ///
    /// The delay races the stamp going stale; a stale stamp drops the report.
    fn spawn_stamped<F>(&self, stamp: EpochStamp, delay: Duration, step: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut stamp = stamp;
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stamp.cancelled() => return,
                }
            }
            if !stamp.is_current() {
                return;
            }
            let completion = step.await;
            if stamp.is_current() {
                let _ = tx.send(Message::Stamped(stamp.epoch(), completion));
            }
        });
    }

    fn teardown(&mut self) {
        if !self.flags.matched {
            self.show_driver("Press any key to reenable fingerprint");
        }
        self.flags.initialized = false;
        self.epoch.bump();
        self.flags.verifying = false;
        self.flags.claiming = false;
        self.flags.started = false;
        self.flags.completed = false;
        self.close_device();
        self.manager = None;
    }

    fn close_device(&mut self) {
        self.signals = None;
        self.flags.signal_connected = false;
        if let Some(device) = self.device.take() {
            tokio::spawn(async move {
                if let Err(e) = device.release().await {
                    debug!("Release of {} failed: {}", device.path(), e);
                }
            });
        }
    }

    fn show_scan(&mut self, text: impl Into<String>) {
        self.scan_status.set(text);
        self.sink.show(StatusSurface::Scan, self.scan_status.as_str());
    }

    fn show_driver(&mut self, text: impl Into<String>) {
        self.driver_status.set(text);
        self.sink
            .show(StatusSurface::Driver, self.driver_status.as_str());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(watch) = self.sleep_watch.take() {
            watch.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, Harness, FAKE_DEVICE_PATH};

    #[tokio::test(start_paused = true)]
    async fn test_init_connects_and_watches_sleep() {
        let mut h = Harness::new();
        h.init().await;

        let snapshot = h.session.snapshot();
        assert!(snapshot.connected);
        assert!(snapshot.phase.initialized);
        assert!(!snapshot.holds_device);
        assert_eq!(h.sleep.subscribers(), 1);
        assert_eq!(h.session.driver_status(), "Initializing...");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_completion_has_no_effect() {
        let mut h = Harness::new();
        h.init().await;

        let stale = h.session.epoch.current();
        h.session.epoch.bump();
        let before = h.session.snapshot();

        h.session
            .tx
            .send(Message::Stamped(
                stale,
                Completion::DefaultDevice(Ok(FAKE_DEVICE_PATH.to_string())),
            ))
            .ok();
        h.session.pump().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.session.pump().await;

        assert_eq!(h.session.snapshot(), before);
        assert_eq!(h.fprintd.count(|c| matches!(c, Call::OpenDevice(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deinit_drops_in_flight_acquisition() {
        let mut h = Harness::new();
        h.init().await;

        assert!(!h.session.verify().await);
        // Let discovery complete and report back
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.fprintd.count(|c| *c == Call::GetDefaultDevice), 1);

        h.session.deinit();
        assert!(!h.session.verify().await);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!h.session.verify().await);

        assert_eq!(h.fprintd.count(|c| matches!(c, Call::OpenDevice(_))), 0);
        assert_eq!(
            h.session.driver_status(),
            "Press any key to reenable fingerprint"
        );
        let snapshot = h.session.snapshot();
        assert!(!snapshot.connected);
        assert!(!snapshot.phase.claiming);
        assert!(!snapshot.phase.initialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deinit_clears_round_flags() {
        let mut h = Harness::new();
        h.init().await;
        assert!(
            h.run_until(Duration::from_secs(2), |h| h.session.snapshot().phase.started)
                .await
        );

        h.session.deinit();
        let snapshot = h.session.snapshot();
        assert!(!snapshot.phase.started);
        assert!(!snapshot.phase.completed);
        assert!(!snapshot.phase.verifying);
        assert!(!snapshot.holds_device);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_restart_flag_records_activity() {
        let mut h = Harness::new();
        h.init().await;
        assert_eq!(h.session.snapshot().timestamps.last_activity, None);

        h.session.set_restart_flag(false);
        h.session.set_restart_flag(true);
        let snapshot = h.session.snapshot();
        assert_eq!(snapshot.idle_restart, IdleRestart::Forced);
        assert!(snapshot.timestamps.last_activity.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_reenables_disabled_session() {
        let mut h = Harness::new();
        h.init().await;
        h.session.counters.fail_count = 10;
        assert!(h.session.is_disabled());

        h.session.deinit();
        h.init().await;
        assert!(!h.session.is_disabled());
        assert_eq!(h.session.snapshot().counters, FailureCounters::default());
        // The sleep subscription is made once per session
        assert_eq!(h.sleep.subscribers(), 1);
    }
}
