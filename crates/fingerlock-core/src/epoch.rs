//! Generation counter invalidating stale asynchronous continuations
//!
//! Every asynchronous operation captures an [`EpochStamp`] when it is issued.
//! Bumping the [`EpochGuard`] makes every older stamp stale. Cancellation is
//! cooperative: a continuation checks [`EpochStamp::is_current`] before it
//! touches session state and exits silently otherwise, and timed waits race
//! against [`EpochStamp::cancelled`]. Nothing aborts a remote call that is
//! already in flight; its result is merely discarded.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// A generation number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(u64);

impl Epoch {
    /// Raw generation value
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle on the current epoch
///
/// Clones share one counter. Any clone may bump; any number of stamps
/// observe.
#[derive(Debug, Clone)]
pub struct EpochGuard {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for EpochGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl EpochGuard {
    /// Create a guard starting at epoch zero
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// The current epoch
    pub fn current(&self) -> Epoch {
        Epoch(*self.tx.borrow())
    }

    /// Advance the epoch, invalidating every outstanding stamp
    pub fn bump(&self) -> Epoch {
        self.tx.send_modify(|epoch| *epoch += 1);
        self.current()
    }

    /// Capture the current epoch for an operation about to be issued
    pub fn stamp(&self) -> EpochStamp {
        let rx = self.tx.subscribe();
        let epoch = Epoch(*rx.borrow());
        EpochStamp { epoch, rx }
    }

    /// Check a previously captured epoch against the current one
    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.current() == epoch
    }
}

/// The epoch captured by one in-flight operation
#[derive(Debug, Clone)]
pub struct EpochStamp {
    epoch: Epoch,
    rx: watch::Receiver<u64>,
}

impl EpochStamp {
    /// Epoch this stamp was captured at
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Whether no bump happened since the stamp was captured
    pub fn is_current(&self) -> bool {
        *self.rx.borrow() == self.epoch.0
    }

    /// Resolve once the stamp goes stale
    ///
    /// Also resolves when every guard is dropped, since nothing can be
    /// current after that.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() != self.epoch.0 {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_bump_invalidates_stamps() {
        let guard = EpochGuard::new();
        let stamp = guard.stamp();
        assert!(stamp.is_current());
        assert!(guard.is_current(stamp.epoch()));

        let next = guard.bump();
        assert!(!stamp.is_current());
        assert!(!guard.is_current(stamp.epoch()));
        assert_eq!(next.value(), stamp.epoch().value() + 1);

        let fresh = guard.stamp();
        assert!(fresh.is_current());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_resolves_on_bump() {
        let guard = EpochGuard::new();
        let mut stamp = guard.stamp();

        let pending = tokio::time::timeout(Duration::from_secs(1), stamp.cancelled()).await;
        assert!(pending.is_err(), "stamp should still be current");

        guard.bump();
        let resolved = tokio::time::timeout(Duration::from_secs(1), stamp.cancelled()).await;
        assert!(resolved.is_ok());
    }

    #[test]
    fn test_clones_share_counter() {
        let guard = EpochGuard::new();
        let watcher = guard.clone();
        let stamp = guard.stamp();

        watcher.bump();
        assert!(!stamp.is_current());
        assert_eq!(guard.current(), watcher.current());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_when_guard_dropped() {
        let guard = EpochGuard::new();
        let mut stamp = guard.stamp();
        drop(guard);
        stamp.cancelled().await;
    }
}
