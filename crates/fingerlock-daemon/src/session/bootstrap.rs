//! Connection to the system bus and the daemon's manager object

use fingerlock_core::{elapsed_since, ResetKind};
use tracing::{debug, error};

use super::Session;
use crate::reset::ResetMode;

impl Session {
    /// Bump the epoch and (re)connect, retrying within a bounded budget
    ///
    /// Failure is reported through the driver status and is not fatal;
    /// verification just never proceeds until a later restart succeeds.
    pub(super) async fn bootstrap(&mut self) {
        self.epoch.bump();
        let mut stamp = self.epoch.stamp();

        let started = self.clock.now();
        self.flags.initialized = true;
        self.flags.claiming = false;
        self.flags.verifying = false;
        self.timestamps.last_signal = Some(started);
        self.counters.clear_unknown_streak();
        self.acquisition_abandoned = false;
        self.show_driver("Initializing...");

        self.connect_manager().await;

        let poll = self.config.bootstrap_poll();
        let retry = self.config.bootstrap_retry();
        let budget = self.config.bootstrap_budget();
        let max_attempts = self.config.bootstrap_max_attempts;

        let mut last_try = started;
        let mut attempts = 1;
        while self.manager.is_none() {
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = stamp.cancelled() => {
                    debug!("Bootstrap superseded");
                    return;
                }
            }

            let now = self.clock.now();
            if attempts >= max_attempts || elapsed_since(now, Some(started)) > budget {
                error!("Failed to initialize fingerprint after {} attempts", attempts);
                self.show_driver("Failed to initialize fingerprint");
                return;
            }

            if elapsed_since(now, Some(last_try)) >= retry {
                last_try = now;
                attempts += 1;
                if attempts % 2 == 0 {
                    self.recovery
                        .maybe_reset(ResetKind::Soft, ResetMode::Detached)
                        .await;
                    if !stamp.is_current() {
                        return;
                    }
                }
                self.timestamps.last_signal = Some(self.clock.now());
                self.connect_manager().await;
            }
        }
    }

    async fn connect_manager(&mut self) {
        match self.connector.connect().await {
            Ok(manager) => {
                debug!("FPrint manager created");
                self.manager = Some(manager);
            }
            Err(e) => {
                error!("{}", e);
                self.show_driver(e.to_string());
            }
        }
    }
}
