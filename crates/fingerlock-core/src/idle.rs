//! Idle-restart request raised by the caller

/// Pending request for the health monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum IdleRestart {
    /// Nothing pending
    #[default]
    None,
    /// Re-arm verification if it looks idle
    Requested,
    /// Restart even if verification started only a few seconds ago
    Forced,
}

impl IdleRestart {
    /// Combine with a new request; a forced request is never downgraded
    pub fn merge(self, force: bool) -> Self {
        let incoming = if force { Self::Forced } else { Self::Requested };
        self.max(incoming)
    }

    /// Consume the pending request
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Whether anything is pending
    pub fn is_pending(self) -> bool {
        self != Self::None
    }

    /// Whether the pending request is forced
    pub fn is_forced(self) -> bool {
        self == Self::Forced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_never_downgrades() {
        assert_eq!(IdleRestart::None.merge(false), IdleRestart::Requested);
        assert_eq!(IdleRestart::None.merge(true), IdleRestart::Forced);
        assert_eq!(IdleRestart::Forced.merge(false), IdleRestart::Forced);
        assert_eq!(IdleRestart::Requested.merge(true), IdleRestart::Forced);
    }

    #[test]
    fn test_take_consumes() {
        let mut request = IdleRestart::None.merge(true);
        assert!(request.is_pending());
        assert!(request.take().is_forced());
        assert!(!request.is_pending());
    }
}
