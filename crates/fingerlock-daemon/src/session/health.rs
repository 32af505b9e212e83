//! Idle-restart handling on caller activity

use chrono::{DateTime, Utc};
use fingerlock_core::{elapsed_since, IdleRestart};
use tracing::debug;

use super::Session;

impl Session {
    /// Act on a pending idle-restart request
    ///
    /// Returns true when an action was taken and the current poll should end.
    pub(super) async fn health_check(&mut self, request: IdleRestart, now: DateTime<Utc>) -> bool {
        if self.is_disabled() || self.flags.matched || self.flags.restarting {
            return false;
        }

        if !self.flags.initialized {
            debug!("Session torn down, bootstrapping again");
            self.bootstrap().await;
            return true;
        }

        let since_start = elapsed_since(now, self.timestamps.last_verify_start);
        if request.is_forced() && since_start >= self.config.force_restart_after() {
            debug!("Forced restart requested");
            self.flags.rebind_device = false;
            self.flags.restarting = true;
            self.restart_step1().await;
            return true;
        }

        if since_start >= self.config.idle_timeout() {
            debug!("Run VerifyStart again due to idle");
            self.flags.verifying = false;
            self.start_verify().await;
            return true;
        }

        if elapsed_since(now, self.timestamps.last_signal) >= self.config.idle_timeout() {
            debug!("Restarting verification due to idle");
            self.flags.rebind_device = false;
            self.flags.restarting = true;
            self.restart_step1().await;
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fingerlock_core::IdleRestart;

    use crate::testing::{Call, Harness};

    async fn started() -> Harness {
        let mut h = Harness::new();
        h.init().await;
        assert!(
            h.run_until(Duration::from_secs(2), |h| h.session.snapshot().phase.started)
                .await
        );
        h
    }

    fn ago(h: &Harness, secs: i64) -> Option<chrono::DateTime<chrono::Utc>> {
        Some(h.session.clock.now() - chrono::Duration::seconds(secs))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_session_needs_nothing() {
        let mut h = started().await;
        let now = h.session.clock.now();
        assert!(!h.session.health_check(IdleRestart::Requested, now).await);
        assert!(!h.session.health_check(IdleRestart::Forced, now).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_verify_start_reissued() {
        let mut h = started().await;
        h.session.timestamps.last_verify_start = ago(&h, 61);

        let now = h.session.clock.now();
        assert!(h.session.health_check(IdleRestart::Requested, now).await);
        assert_eq!(h.fprintd.count(|c| matches!(c, Call::VerifyStart(_))), 2);
        assert!(!h.session.snapshot().phase.restarting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_restarted() {
        let mut h = started().await;
        h.session.timestamps.last_signal = ago(&h, 61);

        let now = h.session.clock.now();
        assert!(h.session.health_check(IdleRestart::Requested, now).await);
        let snapshot = h.session.snapshot();
        assert!(snapshot.phase.restarting);
        assert!(!snapshot.connected);
        assert!(h.reset.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_restart_waits_for_recent_start() {
        let mut h = started().await;
        h.session.timestamps.last_verify_start = ago(&h, 2);
        let now = h.session.clock.now();
        assert!(!h.session.health_check(IdleRestart::Forced, now).await);

        h.session.timestamps.last_verify_start = ago(&h, 3);
        assert!(h.session.health_check(IdleRestart::Forced, now).await);
        assert!(h.session.snapshot().phase.restarting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_torn_down_session_bootstraps() {
        let mut h = started().await;
        h.session.deinit();
        assert!(!h.session.snapshot().connected);

        let now = h.session.clock.now();
        assert!(h.session.health_check(IdleRestart::Requested, now).await);
        assert!(h.session.snapshot().connected);
        assert_eq!(h.fprintd.count(|c| *c == Call::Connect), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_matched_session_left_alone() {
        let mut h = started().await;
        h.fprintd.emit("verify-match", true);
        assert!(h.run_for(Duration::from_millis(200)).await);

        h.session.timestamps.last_signal = ago(&h, 120);
        let now = h.session.clock.now();
        assert!(!h.session.health_check(IdleRestart::Forced, now).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_verification_abandoned() {
        let mut h = started().await;

        assert!(!h.run_for(Duration::from_secs(61)).await);
        let snapshot = h.session.snapshot();
        assert!(!snapshot.connected);
        assert!(!snapshot.phase.verifying);
        assert_eq!(
            h.session.driver_status(),
            "Press any key to reenable fingerprint"
        );
        assert_eq!(h.fprintd.count(|c| *c == Call::Release), 1);
    }
}
