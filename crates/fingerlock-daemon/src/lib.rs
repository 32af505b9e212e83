//! Fingerlock Daemon - Fingerprint verification orchestration for lock screens
//!
//! This crate provides:
//! - The `Session` state machine driving fprintd (bootstrap, acquisition,
//!   verification, staggered restarts, idle handling, sleep/resume)
//! - The process-wide device recovery controller
//! - Collaborator traits for the daemon, sleep notifier, device reset and
//!   status output
//! - D-Bus bindings for fprintd and logind (feature `system-bus`)
//! - Scripted fakes for tests (feature `testing`)

pub mod bus;
pub mod config;
pub mod error;
#[cfg(feature = "system-bus")]
pub mod fprintd;
pub mod reset;
pub mod session;
pub mod status;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bus::{BusConnector, DeviceSignal, FprintDevice, FprintManager, SleepSource};
pub use config::{DaemonConfig, ResetCommandConfig, SessionConfig};
pub use error::{DaemonError, Result};
pub use reset::{CommandReset, DeviceReset, RecoveryController, ResetMode};
pub use session::{Collaborators, PhaseFlags, Session, SessionSnapshot, Timestamps};
pub use status::{LogSink, NullSink, StatusSink, StatusSurface};
