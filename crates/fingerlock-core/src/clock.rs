//! Wall-clock abstraction
//!
//! Idle and cooldown decisions compare wall-clock timestamps so that time
//! spent suspended counts. Tests inject their own clock.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// The system's real-time clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Time elapsed between `since` and `now`
///
/// A missing timestamp counts as infinitely old. A timestamp in the future
/// (clock stepped backwards) counts as zero.
pub fn elapsed_since(now: DateTime<Utc>, since: Option<DateTime<Utc>>) -> Duration {
    match since {
        Some(since) => (now - since).to_std().unwrap_or(Duration::ZERO),
        None => Duration::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_elapsed_since() {
        let now = Utc::now();
        let earlier = now - TimeDelta::seconds(5);

        assert_eq!(elapsed_since(now, Some(earlier)), Duration::from_secs(5));
        assert_eq!(elapsed_since(now, None), Duration::MAX);
        assert_eq!(elapsed_since(earlier, Some(now)), Duration::ZERO);
    }
}
