//! Interfaces to the fingerprint daemon and the sleep notifier
//!
//! The session only ever talks to these traits. Production implementations
//! live in [`crate::fprintd`] (feature `system-bus`); tests use
//! [`crate::testing`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// A signal emitted by a claimed device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSignal {
    /// `VerifyStatus(result, done)`, one per scan attempt
    VerifyStatus {
        /// Result code, e.g. `verify-match`
        result: String,
        /// Whether the daemon considers the round finished
        done: bool,
    },
    /// `VerifyFingerSelected(finger)`
    VerifyFingerSelected {
        /// Finger the daemon picked
        finger: String,
    },
    /// Any other signal on the device object
    Other {
        /// Signal member name
        name: String,
    },
}

/// Opens the system bus and the daemon's manager object
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Connect to the bus and create the manager proxy
    ///
    /// Fails with [`crate::DaemonError::Bus`] when the bus is unreachable and
    /// [`crate::DaemonError::Manager`] when the manager object is.
    async fn connect(&self) -> Result<Arc<dyn FprintManager>>;
}

/// The daemon's manager object
#[async_trait]
pub trait FprintManager: Send + Sync {
    /// `GetDefaultDevice() -> path`
    async fn get_default_device(&self) -> Result<String>;

    /// Create a proxy for the device at `path`
    async fn open_device(&self, path: &str) -> Result<Arc<dyn FprintDevice>>;
}

/// A device object exposed by the daemon
#[async_trait]
pub trait FprintDevice: Send + Sync {
    /// Object path of the device
    fn path(&self) -> &str;

    /// `Claim(app_id)`: take exclusive use of the device
    async fn claim(&self, app_id: &str) -> Result<()>;

    /// `VerifyStart(finger)`
    async fn verify_start(&self, finger: &str) -> Result<()>;

    /// `VerifyStop()`
    async fn verify_stop(&self) -> Result<()>;

    /// `Release()`
    async fn release(&self) -> Result<()>;

    /// Start receiving this device's signals
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<DeviceSignal>>;
}

/// Source of `PrepareForSleep(going_to_sleep)` notifications
#[async_trait]
pub trait SleepSource: Send + Sync {
    /// Start receiving sleep notifications
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<bool>>;
}
