//! Device reset cooldown and escalation
//!
//! Resets momentarily kill the physical reader, so they must never be issued
//! back-to-back. The tracker is shared by every session in the process.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::elapsed_since;

/// Severity of a device power-cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetKind {
    /// Rebind the USB device
    Soft,
    /// Power-cycle the whole port
    Full,
}

impl fmt::Display for ResetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetKind::Soft => f.write_str("soft"),
            ResetKind::Full => f.write_str("full"),
        }
    }
}

/// Reset cooldown configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryPolicy {
    /// Minimum spacing between resets (seconds)
    pub cooldown_secs: u64,

    /// How long a detached reset is supervised before the caller moves on (seconds)
    pub detached_wait_secs: u64,

    /// Number of earlier resets after which every reset is escalated to full
    pub escalate_after: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            cooldown_secs: 3,
            detached_wait_secs: 5,
            escalate_after: 1,
        }
    }
}

impl RecoveryPolicy {
    /// Cooldown as a duration
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Detached supervision window as a duration
    pub fn detached_wait(&self) -> Duration {
        Duration::from_secs(self.detached_wait_secs)
    }
}

/// Timestamps and counter behind the reset decisions
#[derive(Debug, Clone, Default)]
pub struct RecoveryTracker {
    policy: RecoveryPolicy,
    last_reset: Option<DateTime<Utc>>,
    last_full_reset: Option<DateTime<Utc>>,
    resets: u32,
}

impl RecoveryTracker {
    /// Create a tracker with the given policy
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Decide whether a requested reset is issued, and at which severity
    ///
    /// Returns `None` when a full reset already happened within the cooldown.
    /// Otherwise the reset is escalated to full if any reset happened within
    /// the cooldown or an earlier reset was already issued, and the decision
    /// is recorded.
    pub fn plan(&mut self, now: DateTime<Utc>, requested: ResetKind) -> Option<ResetKind> {
        let cooldown = self.policy.cooldown();

        if elapsed_since(now, self.last_full_reset) < cooldown {
            return None;
        }

        let kind = if elapsed_since(now, self.last_reset) < cooldown
            || self.resets >= self.policy.escalate_after
        {
            ResetKind::Full
        } else {
            requested
        };

        self.last_reset = Some(now);
        if kind == ResetKind::Full {
            self.last_full_reset = Some(now);
        }
        self.resets += 1;

        Some(kind)
    }

    /// Number of resets issued so far
    pub fn resets(&self) -> u32 {
        self.resets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_first_reset_keeps_requested_kind() {
        let mut tracker = RecoveryTracker::default();
        assert_eq!(tracker.plan(t0(), ResetKind::Soft), Some(ResetKind::Soft));
        assert_eq!(tracker.resets(), 1);
    }

    #[test]
    fn test_reset_within_cooldown_escalates() {
        let policy = RecoveryPolicy {
            escalate_after: u32::MAX,
            ..RecoveryPolicy::default()
        };
        let mut tracker = RecoveryTracker::new(policy);
        assert_eq!(tracker.plan(t0(), ResetKind::Soft), Some(ResetKind::Soft));
        assert_eq!(
            tracker.plan(t0() + TimeDelta::seconds(2), ResetKind::Soft),
            Some(ResetKind::Full)
        );
    }

    #[test]
    fn test_full_reset_within_cooldown_skips() {
        let mut tracker = RecoveryTracker::default();
        assert_eq!(tracker.plan(t0(), ResetKind::Full), Some(ResetKind::Full));
        assert_eq!(tracker.plan(t0() + TimeDelta::seconds(2), ResetKind::Soft), None);
        assert_eq!(tracker.resets(), 1);

        // Cooldown over, but an earlier reset means escalation
        assert_eq!(
            tracker.plan(t0() + TimeDelta::seconds(3), ResetKind::Soft),
            Some(ResetKind::Full)
        );
    }

    #[test]
    fn test_prior_reset_escalates_after_cooldown() {
        let mut tracker = RecoveryTracker::default();
        assert_eq!(tracker.plan(t0(), ResetKind::Soft), Some(ResetKind::Soft));
        assert_eq!(
            tracker.plan(t0() + TimeDelta::seconds(30), ResetKind::Soft),
            Some(ResetKind::Full)
        );
    }

    #[test]
    fn test_soft_then_full_within_cooldown_skips_third() {
        let mut tracker = RecoveryTracker::default();
        tracker.plan(t0(), ResetKind::Soft);
        assert_eq!(
            tracker.plan(t0() + TimeDelta::seconds(1), ResetKind::Soft),
            Some(ResetKind::Full)
        );
        assert_eq!(tracker.plan(t0() + TimeDelta::seconds(2), ResetKind::Soft), None);
    }
}
