//! Failure counters and the permanent-disable policy

use serde::{Deserialize, Serialize};

/// Thresholds past which fingerprint unlock is disabled for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisablePolicy {
    /// Cumulative failed matches before disabling
    pub max_failures: u32,

    /// Cumulative full restarts before disabling
    pub max_restarts: u32,
}

impl Default for DisablePolicy {
    fn default() -> Self {
        Self {
            max_failures: 10,
            max_restarts: 3,
        }
    }
}

impl DisablePolicy {
    /// Whether the counters have crossed either threshold
    pub fn should_disable(&self, counters: &FailureCounters) -> bool {
        counters.fail_count >= self.max_failures || counters.restart_count >= self.max_restarts
    }
}

/// Counters tracked by a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCounters {
    /// Failed `GetDefaultDevice` calls in the current acquisition
    pub open_device_failures: u32,

    /// Failed `Claim` calls in the current acquisition
    pub claim_failures: u32,

    /// Consecutive unknown-error results
    pub unknown_error_streak: u32,

    /// Cumulative failed matches
    pub fail_count: u32,

    /// Cumulative full restarts
    pub restart_count: u32,
}

impl FailureCounters {
    /// Count one more unknown error; true once the streak exceeds `threshold`
    pub fn record_unknown_error(&mut self, threshold: u32) -> bool {
        self.unknown_error_streak += 1;
        self.unknown_error_streak > threshold
    }

    /// Break the unknown-error streak
    pub fn clear_unknown_streak(&mut self) {
        self.unknown_error_streak = 0;
    }

    /// Count a failed match
    pub fn record_no_match(&mut self) {
        self.fail_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_disable_thresholds() {
        let policy = DisablePolicy::default();
        let mut counters = FailureCounters::default();
        assert!(!policy.should_disable(&counters));

        counters.fail_count = 9;
        assert!(!policy.should_disable(&counters));
        counters.fail_count = 10;
        assert!(policy.should_disable(&counters));

        let counters = FailureCounters {
            restart_count: 3,
            ..FailureCounters::default()
        };
        assert!(policy.should_disable(&counters));
    }

    #[test]
    fn test_unknown_streak_exceeds_threshold_on_fourth() {
        let mut counters = FailureCounters::default();
        assert!(!counters.record_unknown_error(3));
        assert!(!counters.record_unknown_error(3));
        assert!(!counters.record_unknown_error(3));
        assert!(counters.record_unknown_error(3));

        counters.clear_unknown_streak();
        assert_eq!(counters.unknown_error_streak, 0);
        assert!(!counters.record_unknown_error(3));
    }

    proptest! {
        #[test]
        fn prop_disable_iff_threshold_crossed(fails in 0u32..20, restarts in 0u32..6) {
            let policy = DisablePolicy::default();
            let counters = FailureCounters {
                fail_count: fails,
                restart_count: restarts,
                ..FailureCounters::default()
            };
            prop_assert_eq!(policy.should_disable(&counters), fails >= 10 || restarts >= 3);
        }
    }
}
