//! Scripted collaborators for driving a [`crate::Session`] without a bus
//!
//! [`FakeFprintd`] stands in for the daemon: it records every call, fails
//! calls on demand and emits `VerifyStatus` signals. The remaining fakes
//! cover sleep notifications, device resets, status output and time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use fingerlock_core::{Clock, ResetKind};

use crate::bus::{BusConnector, DeviceSignal, FprintDevice, FprintManager, SleepSource};
use crate::config::SessionConfig;
use crate::error::{DaemonError, Result};
use crate::reset::{DeviceReset, RecoveryController};
use crate::session::{Collaborators, Session};
use crate::status::{StatusSink, StatusSurface};

/// Object path the fake daemon reports as its default device
pub const FAKE_DEVICE_PATH: &str = "/net/reactivated/Fprint/Device/0";

/// A call received by the fake daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    GetDefaultDevice,
    OpenDevice(String),
    Claim(String),
    VerifyStart(String),
    VerifyStop,
    Release,
    Subscribe,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    connect_failures: u32,
    default_device_failures: u32,
    open_failures: u32,
    claim_failures: u32,
    verify_start_failures: u32,
    verify_stop_failures: u32,
    subscribe_failures: u32,
    verify_start_delay: Option<Duration>,
    during_verify_start: Vec<DeviceSignal>,
    results: VecDeque<(String, bool)>,
    signals: Option<mpsc::UnboundedSender<DeviceSignal>>,
}

/// Take one scheduled failure, if any remain
fn take_failure(remaining: &mut u32) -> bool {
    if *remaining == 0 {
        return false;
    }
    *remaining -= 1;
    true
}

/// A scripted fingerprint daemon
#[derive(Clone, Default)]
pub struct FakeFprintd {
    state: Arc<Mutex<FakeState>>,
}

impl FakeFprintd {
    /// Create a daemon where every call succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus connector that hands out this daemon's manager
    pub fn connector(&self) -> Arc<FakeConnector> {
        Arc::new(FakeConnector {
            fprintd: self.clone(),
        })
    }

    /// Fail the next `count` bus connections
    pub fn fail_connect(&self, count: u32) {
        self.state.lock().connect_failures = count;
    }

    /// Fail the next `count` `GetDefaultDevice` calls
    pub fn fail_default_device(&self, count: u32) {
        self.state.lock().default_device_failures = count;
    }

    /// Fail the next `count` device proxy creations
    pub fn fail_open(&self, count: u32) {
        self.state.lock().open_failures = count;
    }

    /// Fail the next `count` `Claim` calls
    pub fn fail_claim(&self, count: u32) {
        self.state.lock().claim_failures = count;
    }

    /// Fail the next `count` `VerifyStart` calls
    pub fn fail_verify_start(&self, count: u32) {
        self.state.lock().verify_start_failures = count;
    }

    /// Fail the next `count` `VerifyStop` calls
    pub fn fail_verify_stop(&self, count: u32) {
        self.state.lock().verify_stop_failures = count;
    }

    /// Fail the next `count` signal subscriptions
    pub fn fail_subscribe(&self, count: u32) {
        self.state.lock().subscribe_failures = count;
    }

    /// Make `VerifyStart` take `delay` before it returns
    pub fn delay_verify_start(&self, delay: Duration) {
        self.state.lock().verify_start_delay = Some(delay);
    }

    /// Emit `result` while the next `VerifyStart` is still in flight
    pub fn emit_during_verify_start(&self, result: &str, done: bool) {
        self.state.lock().during_verify_start.push(DeviceSignal::VerifyStatus {
            result: result.to_string(),
            done,
        });
    }

    /// Queue `result` to be emitted shortly after the next accepted `VerifyStart`
    ///
    /// Each accepted `VerifyStart` pops one queued result.
    pub fn queue_result(&self, result: &str, done: bool) {
        self.state
            .lock()
            .results
            .push_back((result.to_string(), done));
    }

    /// Emit `VerifyStatus(result, done)` on the subscribed device now
    pub fn emit(&self, result: &str, done: bool) -> bool {
        self.emit_signal(DeviceSignal::VerifyStatus {
            result: result.to_string(),
            done,
        })
    }

    /// Emit an arbitrary signal; false if nobody is subscribed
    pub fn emit_signal(&self, signal: DeviceSignal) -> bool {
        match &self.state.lock().signals {
            Some(tx) => tx.send(signal).is_ok(),
            None => false,
        }
    }

    /// Every call received so far
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Number of received calls matching `predicate`
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Forget the recorded calls
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

/// Connector handing out a [`FakeFprintd`] manager
pub struct FakeConnector {
    fprintd: FakeFprintd,
}

#[async_trait]
impl BusConnector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn FprintManager>> {
        self.fprintd.record(Call::Connect);
        if take_failure(&mut self.fprintd.state.lock().connect_failures) {
            return Err(DaemonError::Bus("connection refused".to_string()));
        }
        Ok(Arc::new(FakeManager {
            fprintd: self.fprintd.clone(),
        }))
    }
}

struct FakeManager {
    fprintd: FakeFprintd,
}

#[async_trait]
impl FprintManager for FakeManager {
    async fn get_default_device(&self) -> Result<String> {
        self.fprintd.record(Call::GetDefaultDevice);
        if take_failure(&mut self.fprintd.state.lock().default_device_failures) {
            return Err(DaemonError::Device("No devices available".to_string()));
        }
        Ok(FAKE_DEVICE_PATH.to_string())
    }

    async fn open_device(&self, path: &str) -> Result<Arc<dyn FprintDevice>> {
        self.fprintd.record(Call::OpenDevice(path.to_string()));
        if take_failure(&mut self.fprintd.state.lock().open_failures) {
            return Err(DaemonError::Device("No such object".to_string()));
        }
        Ok(Arc::new(FakeDevice {
            path: path.to_string(),
            fprintd: self.fprintd.clone(),
        }))
    }
}

/// Device handed out by [`FakeFprintd`]
pub struct FakeDevice {
    path: String,
    fprintd: FakeFprintd,
}

#[async_trait]
impl FprintDevice for FakeDevice {
    fn path(&self) -> &str {
        &self.path
    }

    async fn claim(&self, app_id: &str) -> Result<()> {
        self.fprintd.record(Call::Claim(app_id.to_string()));
        if take_failure(&mut self.fprintd.state.lock().claim_failures) {
            return Err(DaemonError::Device("Device was already claimed".to_string()));
        }
        Ok(())
    }

    async fn verify_start(&self, finger: &str) -> Result<()> {
        self.fprintd.record(Call::VerifyStart(finger.to_string()));

        let (delay, early) = {
            let mut state = self.fprintd.state.lock();
            (
                state.verify_start_delay,
                std::mem::take(&mut state.during_verify_start),
            )
        };
        for signal in early {
            self.fprintd.emit_signal(signal);
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = {
            let mut state = self.fprintd.state.lock();
            if take_failure(&mut state.verify_start_failures) {
                return Err(DaemonError::Device("Verification already in progress".to_string()));
            }
            state.results.pop_front()
        };

        if let Some((result, done)) = queued {
            let fprintd = self.fprintd.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                fprintd.emit(&result, done);
            });
        }
        Ok(())
    }

    async fn verify_stop(&self) -> Result<()> {
        self.fprintd.record(Call::VerifyStop);
        if take_failure(&mut self.fprintd.state.lock().verify_stop_failures) {
            return Err(DaemonError::Device("No verification in progress".to_string()));
        }
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.fprintd.record(Call::Release);
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<DeviceSignal>> {
        self.fprintd.record(Call::Subscribe);
        let mut state = self.fprintd.state.lock();
        if take_failure(&mut state.subscribe_failures) {
            return Err(DaemonError::Device("Failed to add match rule".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.signals = Some(tx);
        Ok(rx)
    }
}

/// Scripted `PrepareForSleep` source
#[derive(Default)]
pub struct FakeSleep {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<bool>>>,
}

impl FakeSleep {
    /// Deliver `PrepareForSleep(going_to_sleep)` to every subscriber
    pub fn notify(&self, going_to_sleep: bool) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(going_to_sleep).is_ok());
    }

    /// Number of live subscriptions
    pub fn subscribers(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[async_trait]
impl SleepSource for FakeSleep {
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<bool>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        Ok(rx)
    }
}

/// Device reset that records each invocation
#[derive(Default)]
pub struct RecordingReset {
    calls: Mutex<Vec<ResetKind>>,
    delay: Option<Duration>,
}

impl RecordingReset {
    /// A reset that takes `delay` to complete
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    /// Resets issued so far, in order
    pub fn calls(&self) -> Vec<ResetKind> {
        self.calls.lock().clone()
    }

    async fn run(&self, kind: ResetKind) -> Result<()> {
        self.calls.lock().push(kind);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceReset for RecordingReset {
    async fn soft_reset(&self) -> Result<()> {
        self.run(ResetKind::Soft).await
    }

    async fn full_reset(&self) -> Result<()> {
        self.run(ResetKind::Full).await
    }
}

/// Status sink that keeps every update
#[derive(Default)]
pub struct RecordingSink {
    shown: Mutex<Vec<(StatusSurface, String)>>,
}

impl RecordingSink {
    /// Every update, in order
    pub fn shown(&self) -> Vec<(StatusSurface, String)> {
        self.shown.lock().clone()
    }

    /// Texts shown on one surface, in order
    pub fn texts(&self, surface: StatusSurface) -> Vec<String> {
        self.shown
            .lock()
            .iter()
            .filter(|(s, _)| *s == surface)
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Whether `text` was ever shown on `surface`
    pub fn saw(&self, surface: StatusSurface, text: &str) -> bool {
        self.shown
            .lock()
            .iter()
            .any(|(s, t)| *s == surface && t == text)
    }
}

impl StatusSink for RecordingSink {
    fn show(&self, surface: StatusSurface, text: &str) {
        self.shown.lock().push((surface, text.to_string()));
    }
}

/// Wall clock that advances with tokio's (possibly paused) clock
pub struct PausedClock {
    origin: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl PausedClock {
    /// Start at the current wall-clock time
    pub fn new() -> Self {
        Self {
            origin: Utc::now(),
            start: tokio::time::Instant::now(),
        }
    }
}

impl Default for PausedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.start.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin + elapsed
    }
}

/// Interval at which [`Harness`] polls the session
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A session wired to a full set of fakes
pub struct Harness {
    pub session: Session,
    pub fprintd: FakeFprintd,
    pub reset: Arc<RecordingReset>,
    pub sleep: Arc<FakeSleep>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    /// Harness with the default session configuration
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    /// Harness with a custom session configuration
    pub fn with_config(config: SessionConfig) -> Self {
        let fprintd = FakeFprintd::new();
        let reset = Arc::new(RecordingReset::default());
        let sleep = Arc::new(FakeSleep::default());
        let clock: Arc<dyn Clock> = Arc::new(PausedClock::new());

        let recovery = Arc::new(RecoveryController::new(
            Default::default(),
            reset.clone(),
            clock.clone(),
        ));
        let session = Session::new(
            config,
            Collaborators {
                connector: fprintd.connector(),
                recovery,
                clock,
                sleep: Some(sleep.clone()),
            },
        );

        Self {
            session,
            fprintd,
            reset,
            sleep,
            sink: Arc::new(RecordingSink::default()),
        }
    }

    /// `init` the session with the recording sink
    pub async fn init(&mut self) {
        self.session.init(self.sink.clone()).await;
    }

    /// Poll for `duration`; true as soon as `verify` confirms a match
    pub async fn run_for(&mut self, duration: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + duration;
        while tokio::time::Instant::now() < deadline {
            if self.session.verify().await {
                return true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        false
    }

    /// Poll until `condition` holds or `limit` passes; returns whether it held
    pub async fn run_until(&mut self, limit: Duration, condition: impl Fn(&Harness) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            self.session.verify().await;
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        condition(self)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
