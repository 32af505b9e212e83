//! Verification rounds and `VerifyStatus` classification

use std::future::pending;

use fingerlock_core::{elapsed_since, Disposition, VerifyOutcome};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::Session;
use crate::bus::DeviceSignal;
use crate::error::DaemonError;

/// Next signal from the device, or never if there is no subscription
async fn next_signal(signals: &mut Option<mpsc::UnboundedReceiver<DeviceSignal>>) -> DeviceSignal {
    match signals {
        Some(rx) => match rx.recv().await {
            Some(signal) => signal,
            None => pending().await,
        },
        None => pending().await,
    }
}

impl Session {
    /// Begin a verification round and wait for the daemon to accept it
    ///
    /// Status signals delivered before `VerifyStart` returns belong to the
    /// daemon's own bookkeeping and are discarded.
    pub(super) async fn start_verify(&mut self) {
        if self.is_disabled() || self.flags.verifying || self.flags.restarting {
            return;
        }
        let Some(device) = self.device.clone() else {
            return;
        };

        self.timestamps.last_verify_start = Some(self.clock.now());
        debug!("Starting verification");
        self.flags.verifying = true;
        self.flags.started = false;
        self.flags.completed = false;
        self.flags.matched = false;

        let mut stamp = self.epoch.stamp();
        let finger = self.config.finger.clone();
        let deadline = tokio::time::Instant::now() + self.config.verify_start_timeout();

        let mut call = device.verify_start(&finger);
        let accepted = loop {
            tokio::select! {
                result = &mut call => break result,
                _ = stamp.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => break Err(DaemonError::Timeout),
                signal = next_signal(&mut self.signals) => {
                    debug!("Discarding {:?} received before verification started", signal);
                }
            }
        };
        drop(call);

        // Anything already queued was emitted before the reply
        if let Some(signals) = self.signals.as_mut() {
            while let Ok(signal) = signals.try_recv() {
                debug!("Discarding {:?} received before verification started", signal);
            }
        }

        match accepted {
            Err(DaemonError::Timeout) => {
                error!("VerifyStart timeout");
                self.show_driver("Failed to start verification (timeout)");
                self.schedule_restart(false);
            }
            Err(e) => {
                error!("VerifyStart failed: {}", e);
                self.show_driver(format!("Failed to start verification: {e}"));
            }
            Ok(()) => {
                debug!("Verify started");
                self.flags.started = true;
                self.show_driver("Scan your finger");
                if self.scan_status.is_empty() {
                    self.show_scan("...");
                }
            }
        }
    }

    /// Route a device signal; only `VerifyStatus` during a started round counts
    pub(super) async fn on_signal(&mut self, signal: DeviceSignal) {
        if !self.flags.started || self.flags.restarting {
            return;
        }

        match signal {
            DeviceSignal::VerifyStatus { result, done } => self.verify_result(&result, done).await,
            DeviceSignal::VerifyFingerSelected { .. } => {}
            DeviceSignal::Other { name } => debug!("Received unexpected signal {}", name),
        }
    }

    async fn verify_result(&mut self, result: &str, done: bool) {
        self.timestamps.last_signal = Some(self.clock.now());
        info!(
            "Verify result: {} ({})",
            result,
            if done { "done" } else { "not done" }
        );

        let outcome = VerifyOutcome::parse(result);
        self.flags.matched = outcome.is_match();

        let mut should_restart = false;
        let mut unknown = false;
        let mut detail: Option<String> = None;
        match outcome.disposition() {
            Disposition::RetrySilently(hint) => {
                self.counters.clear_unknown_streak();
                self.show_scan(hint);
                return;
            }
            Disposition::UnknownError => {
                should_restart = self
                    .counters
                    .record_unknown_error(self.config.unknown_error_threshold);
                unknown = true;
                detail = Some("Unknown error".to_string());
            }
            Disposition::Disconnected => {
                self.counters.clear_unknown_streak();
                detail = Some("Device disconnected".to_string());
            }
            Disposition::Match => self.counters.clear_unknown_streak(),
            Disposition::NoMatch => {
                self.counters.clear_unknown_streak();
                self.counters.record_no_match();
            }
            Disposition::Unrecognized => {
                self.counters.clear_unknown_streak();
                detail = Some(outcome.as_str().to_string());
            }
        }

        let disable = self.is_disabled();
        if disable {
            detail = Some("FP Disabled".to_string());
            should_restart = false;
        }

        let shown = if unknown {
            self.counters.unknown_error_streak
        } else {
            self.counters.fail_count
        };
        let text = match (self.flags.matched, detail) {
            (true, Some(detail)) => format!("FP OK: {detail}"),
            (true, None) => "FP OK".to_string(),
            (false, Some(detail)) => format!("FP Failed ({shown}): {detail}"),
            (false, None) => format!("FP Failed ({})", self.counters.fail_count),
        };
        self.show_scan(text);

        self.flags.completed = true;
        self.flags.verifying = false;

        if let Some(device) = self.device.clone() {
            let stamp = self.epoch.stamp();
            if let Err(e) = device.verify_stop().await {
                error!("VerifyStop failed: {}", e);
                self.show_driver(format!("Failed to stop verification: {e}"));
                return;
            }
            if !stamp.is_current() {
                return;
            }
        }

        if disable {
            self.deinit();
        } else if should_restart && !self.flags.matched {
            let idle = elapsed_since(self.clock.now(), self.timestamps.last_activity);
            if idle > self.config.activity_window() {
                debug!("No recent activity, giving up instead of restarting");
                self.deinit();
                return;
            }
            debug!("Restarting verification");
            self.schedule_restart(true);
        }
    }
}
