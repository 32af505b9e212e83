//! Physical device recovery
//!
//! [`RecoveryController`] decides whether a reset may run (cooldown and
//! escalation live in [`RecoveryTracker`]) and invokes the [`DeviceReset`]
//! capability either inline or in a detached task with bounded supervision.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{debug, warn};

use fingerlock_core::{Clock, RecoveryPolicy, RecoveryTracker, ResetKind};

use crate::config::ResetCommandConfig;
use crate::error::{DaemonError, Result};

/// Capability to power-cycle the fingerprint reader
#[async_trait]
pub trait DeviceReset: Send + Sync {
    /// Rebind the device
    async fn soft_reset(&self) -> Result<()>;

    /// Power-cycle the device
    async fn full_reset(&self) -> Result<()>;

    /// Dispatch on severity
    async fn reset(&self, kind: ResetKind) -> Result<()> {
        match kind {
            ResetKind::Soft => self.soft_reset().await,
            ResetKind::Full => self.full_reset().await,
        }
    }
}

/// Device reset through the privileged helper command
#[derive(Debug, Clone)]
pub struct CommandReset {
    config: ResetCommandConfig,
}

impl CommandReset {
    /// Create a reset backed by the configured helper
    pub fn new(config: ResetCommandConfig) -> Self {
        Self { config }
    }

    /// Arguments passed to the helper for a reset of the given kind
    pub fn args_for(&self, kind: ResetKind) -> Vec<String> {
        let mut args = self.config.args.clone();
        if kind == ResetKind::Full && !self.config.full_arg.is_empty() {
            args.push(self.config.full_arg.clone());
        }
        args
    }

    async fn run(&self, kind: ResetKind) -> Result<()> {
        let args = self.args_for(kind);
        debug!("Running {} {:?}", self.config.program, args);

        let status = Command::new(&self.config.program)
            .args(&args)
            .status()
            .await
            .map_err(|e| DaemonError::Reset(format!("{}: {}", self.config.program, e)))?;

        if !status.success() {
            return Err(DaemonError::Reset(format!(
                "{} exited with {}",
                self.config.program, status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceReset for CommandReset {
    async fn soft_reset(&self) -> Result<()> {
        self.run(ResetKind::Soft).await
    }

    async fn full_reset(&self) -> Result<()> {
        self.run(ResetKind::Full).await
    }
}

/// How the caller waits for a reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Wait for the reset to finish
    Blocking,
    /// Run in a detached task, supervised for at most the policy's detached wait
    Detached,
}

/// Process-wide reset policy shared by every session
pub struct RecoveryController {
    tracker: Mutex<RecoveryTracker>,
    reset: Arc<dyn DeviceReset>,
    clock: Arc<dyn Clock>,
    detached_wait: Duration,
}

impl RecoveryController {
    /// Create a controller
    pub fn new(policy: RecoveryPolicy, reset: Arc<dyn DeviceReset>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tracker: Mutex::new(RecoveryTracker::new(policy)),
            reset,
            clock,
            detached_wait: policy.detached_wait(),
        }
    }

    /// Reset the device unless the cooldown forbids it
    ///
    /// Returns the severity actually issued, or `None` if skipped. Reset
    /// failures are logged, never returned.
    pub async fn maybe_reset(&self, requested: ResetKind, mode: ResetMode) -> Option<ResetKind> {
        debug!("Restarting fingerprint device ({} requested)", requested);

        let planned = self.tracker.lock().plan(self.clock.now(), requested);
        let Some(kind) = planned else {
            debug!("Skipping fingerprint device restart, full reset in cooldown");
            return None;
        };

        match mode {
            ResetMode::Blocking => {
                if let Err(e) = self.reset.reset(kind).await {
                    warn!("Device {} reset failed: {}", kind, e);
                }
            }
            ResetMode::Detached => {
                let reset = Arc::clone(&self.reset);
                let handle = tokio::spawn(async move { reset.reset(kind).await });

                match tokio::time::timeout(self.detached_wait, handle).await {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(e))) => warn!("Device {} reset failed: {}", kind, e),
                    Ok(Err(e)) => warn!("Device {} reset task failed: {}", kind, e),
                    Err(_) => warn!(
                        "Device {} reset still running after {:?}, leaving it detached",
                        kind, self.detached_wait
                    ),
                }
            }
        }

        Some(kind)
    }

    /// Number of resets issued so far
    pub fn resets(&self) -> u32 {
        self.tracker.lock().resets()
    }
}
