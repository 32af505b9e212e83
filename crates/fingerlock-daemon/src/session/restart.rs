//! Two-step staggered restart
//!
//! Step 1 tears the session down; step 2 rebuilds it. Both fire after the
//! configured delay under the epoch captured when they were scheduled, so a
//! `deinit` in between cancels whatever is still pending.

use fingerlock_core::ResetKind;
use tracing::debug;

use super::{Completion, Session};
use crate::reset::ResetMode;

impl Session {
    /// Schedule a full restart, optionally power-cycling the reader
    pub(super) fn schedule_restart(&mut self, rebind: bool) {
        self.flags.restarting = true;
        self.flags.rebind_device = rebind;
        self.spawn_stamped(self.epoch.stamp(), self.config.restart_delay(), async {
            Completion::RestartStep1
        });
    }

    pub(super) async fn restart_step1(&mut self) {
        debug!("Restart step 1 (rebind: {})", self.flags.rebind_device);
        self.timestamps.last_signal = Some(self.clock.now());
        self.teardown();
        self.flags.started = false;
        self.flags.completed = false;
        self.flags.matched = false;

        let stamp = self.epoch.stamp();
        if std::mem::take(&mut self.flags.rebind_device) {
            self.recovery
                .maybe_reset(ResetKind::Soft, ResetMode::Detached)
                .await;
            if !stamp.is_current() {
                return;
            }
        }

        self.spawn_stamped(stamp, self.config.restart_delay(), async {
            Completion::RestartStep2
        });
    }

    pub(super) async fn restart_step2(&mut self) {
        self.timestamps.last_signal = Some(self.clock.now());
        self.counters.restart_count += 1;
        self.flags.restarting = false;
        debug!("Restart step 2 (restart #{})", self.counters.restart_count);

        if self.is_disabled() {
            if self.scan_status.is_empty() {
                self.show_driver("Disabled");
            }
            return;
        }

        self.bootstrap().await;
        self.show_scan("");
        self.acquire();
    }
}
