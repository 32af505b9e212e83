//! Status text surfaced to the lock screen

use std::fmt;

use tracing::info;

/// Which status line a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusSurface {
    /// User-facing scan status ("Retry", "FP OK", ...)
    Scan,
    /// Driver and connection status ("FP Claiming", ...)
    Driver,
}

impl fmt::Display for StatusSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusSurface::Scan => f.write_str("scan"),
            StatusSurface::Driver => f.write_str("driver"),
        }
    }
}

/// Receives status updates; the lock screen redraws on each call
pub trait StatusSink: Send + Sync {
    /// A status line changed
    fn show(&self, surface: StatusSurface, text: &str);
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn show(&self, _surface: StatusSurface, _text: &str) {}
}

/// Sink that renders status changes as log lines
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn show(&self, surface: StatusSurface, text: &str) {
        info!(%surface, "{}", text);
    }
}
