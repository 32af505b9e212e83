//! Device acquisition: discover, open, claim

use std::sync::Arc;
use std::time::Duration;

use fingerlock_core::ResetKind;
use tracing::{debug, error, warn};

use super::{Completion, Session};
use crate::bus::{FprintDevice, FprintManager};
use crate::error::Result;
use crate::reset::ResetMode;

impl Session {
    /// Start the discover → open → claim pipeline unless one is running
    pub(super) fn acquire(&mut self) {
        if self.flags.claiming || self.acquisition_abandoned {
            return;
        }
        let Some(manager) = self.manager.clone() else {
            return;
        };

        self.close_device();
        self.flags.claiming = true;
        self.counters.open_device_failures = 0;
        self.counters.claim_failures = 0;
        self.show_driver("Getting default device...");
        self.spawn_discover(manager, Duration::ZERO);
    }

    fn spawn_discover(&self, manager: Arc<dyn FprintManager>, settle: Duration) {
        self.spawn_stamped(self.epoch.stamp(), settle, async move {
            Completion::DefaultDevice(manager.get_default_device().await)
        });
    }

    fn spawn_claim(&self, device: Arc<dyn FprintDevice>) {
        let app_id = self.config.app_id.clone();
        self.spawn_stamped(self.epoch.stamp(), Duration::ZERO, async move {
            let result = device.claim(&app_id).await;
            Completion::Claimed { device, result }
        });
    }

    pub(super) async fn on_default_device(&mut self, result: Result<String>) {
        let Some(manager) = self.manager.clone() else {
            self.flags.claiming = false;
            return;
        };

        let path = match result {
            Ok(path) => path,
            Err(e) => {
                error!("GetDefaultDevice failed: {}", e);
                self.show_driver("Failed to get default device");

                self.counters.open_device_failures += 1;
                let attempt = self.counters.open_device_failures;
                if attempt >= self.config.discover_max_attempts {
                    warn!("No default device after {} attempts, giving up", attempt);
                    self.flags.claiming = false;
                    self.acquisition_abandoned = true;
                    return;
                }

                let mut settle = Duration::ZERO;
                if attempt == 2 || attempt == 3 {
                    let stamp = self.epoch.stamp();
                    let kind = if attempt == 3 {
                        ResetKind::Full
                    } else {
                        ResetKind::Soft
                    };
                    self.recovery.maybe_reset(kind, ResetMode::Detached).await;
                    if !stamp.is_current() {
                        return;
                    }
                    settle = self.config.settle();
                }

                self.spawn_discover(manager, settle);
                return;
            }
        };

        debug!(
            "Fingerprint: using device {} after {} failed queries",
            path, self.counters.open_device_failures
        );
        self.show_driver("FP Proxying");
        self.counters.open_device_failures = 0;

        self.spawn_stamped(self.epoch.stamp(), Duration::ZERO, async move {
            Completion::DeviceOpened(manager.open_device(&path).await)
        });
    }

    pub(super) fn on_device_opened(&mut self, result: Result<Arc<dyn FprintDevice>>) {
        match result {
            Ok(device) => {
                self.show_driver("FP Claiming");
                self.spawn_claim(device);
            }
            Err(e) => {
                error!("Failed to connect to device: {}", e);
                self.show_driver(format!("Failed to connect to device: {e}"));
                self.flags.claiming = false;
                self.acquisition_abandoned = true;
            }
        }
    }

    pub(super) async fn on_claimed(&mut self, device: Arc<dyn FprintDevice>, result: Result<()>) {
        if let Err(e) = result {
            error!("Failed to claim the device: {}", e);
            self.show_driver(format!("Failed to claim the device: {e}"));

            self.counters.claim_failures += 1;
            if self.counters.claim_failures < self.config.claim_max_attempts {
                self.spawn_claim(device);
                return;
            }

            let stamp = self.epoch.stamp();
            self.recovery
                .maybe_reset(ResetKind::Soft, ResetMode::Detached)
                .await;
            if !stamp.is_current() {
                return;
            }
            self.flags.claiming = false;
            drop(device);
            self.schedule_restart(true);
            return;
        }

        debug!("FPrint device opened {}", device.path());
        self.flags.claiming = false;
        self.device = Some(device);
        self.connect_signal_and_start_verify().await;
    }

    /// Subscribe to the device's signals once, then start verifying
    async fn connect_signal_and_start_verify(&mut self) {
        if self.flags.signal_connected {
            return;
        }
        let Some(device) = self.device.clone() else {
            return;
        };

        match device.subscribe().await {
            Ok(signals) => {
                self.signals = Some(signals);
                self.flags.signal_connected = true;
            }
            Err(e) => {
                error!("Failed to subscribe to {} signals: {}", device.path(), e);
                self.show_driver(format!("Failed to listen to device: {e}"));
                self.schedule_restart(false);
                return;
            }
        }

        self.start_verify().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::status::StatusSurface;
    use crate::testing::{Call, Harness, FAKE_DEVICE_PATH};
    use fingerlock_core::{ResetKind, ANY_FINGER};

    #[tokio::test(start_paused = true)]
    async fn test_acquisition_claims_and_starts_verify() {
        let mut h = Harness::new();
        h.init().await;

        assert!(
            h.run_until(Duration::from_secs(2), |h| h.session.snapshot().phase.started)
                .await
        );
        assert_eq!(
            h.fprintd.calls(),
            vec![
                Call::Connect,
                Call::GetDefaultDevice,
                Call::OpenDevice(FAKE_DEVICE_PATH.to_string()),
                Call::Claim(String::new()),
                Call::Subscribe,
                Call::VerifyStart(ANY_FINGER.to_string()),
            ]
        );
        assert_eq!(
            h.sink.texts(StatusSurface::Driver),
            vec![
                "Initializing...",
                "Getting default device...",
                "FP Proxying",
                "FP Claiming",
                "Scan your finger",
            ]
        );
        assert_eq!(h.session.scan_status(), "...");
        assert_eq!(
            h.sink.shown().last(),
            Some(&(StatusSurface::Scan, "...".to_string()))
        );
        assert!(h.session.snapshot().holds_device);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_escalates_resets() {
        let mut h = Harness::new();
        h.fprintd.fail_default_device(3);
        h.init().await;

        assert!(
            h.run_until(Duration::from_secs(20), |h| h.session.snapshot().phase.started)
                .await
        );
        assert_eq!(h.fprintd.count(|c| *c == Call::GetDefaultDevice), 4);
        assert_eq!(h.reset.calls(), vec![ResetKind::Soft, ResetKind::Full]);
        assert_eq!(h.session.snapshot().counters.open_device_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_is_not_retried() {
        let mut h = Harness::new();
        h.fprintd.fail_open(1);
        h.init().await;

        assert!(
            h.run_until(Duration::from_secs(1), |h| {
                h.session
                    .driver_status()
                    .starts_with("Failed to connect to device")
            })
            .await
        );
        assert!(!h.session.snapshot().phase.claiming);

        // Polling leaves the report up and does not reopen
        assert!(!h.run_for(Duration::from_secs(2)).await);
        assert!(h
            .session
            .driver_status()
            .starts_with("Failed to connect to device"));
        assert!(h.session.snapshot().acquisition_abandoned);
        assert_eq!(h.fprintd.count(|c| matches!(c, Call::OpenDevice(_))), 1);
        assert_eq!(h.fprintd.count(|c| matches!(c, Call::Claim(_))), 0);

        // Caller activity starts a fresh acquisition
        h.session.set_restart_flag(false);
        assert!(
            h.run_until(Duration::from_secs(2), |h| h.session.snapshot().phase.started)
                .await
        );
        assert_eq!(h.fprintd.count(|c| matches!(c, Call::OpenDevice(_))), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_failure_schedules_restart() {
        let mut h = Harness::new();
        h.fprintd.fail_subscribe(1);
        h.init().await;

        assert!(
            h.run_until(Duration::from_secs(1), |h| h.session.snapshot().phase.restarting)
                .await
        );
        assert_eq!(h.fprintd.count(|c| matches!(c, Call::VerifyStart(_))), 0);

        assert!(
            h.run_until(Duration::from_secs(5), |h| h.session.snapshot().phase.started)
                .await
        );
        assert_eq!(h.session.snapshot().counters.restart_count, 1);
        assert!(h.reset.calls().is_empty());
    }
}
