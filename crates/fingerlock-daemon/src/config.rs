//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use fingerlock_core::{DisablePolicy, RecoveryPolicy, ANY_FINGER};

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Verification state machine tuning
    pub session: SessionConfig,

    /// Device reset cooldown and supervision
    pub recovery: RecoveryPolicy,

    /// External device reset helper
    pub reset: ResetCommandConfig,

    /// How often the host polls `verify()` (milliseconds)
    pub poll_interval_millis: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            recovery: RecoveryPolicy::default(),
            reset: ResetCommandConfig::default(),
            poll_interval_millis: 100,
        }
    }
}

/// Timings, retry bounds and thresholds of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Application id passed to `Claim` (empty means the calling user)
    pub app_id: String,

    /// Finger passed to `VerifyStart`
    pub finger: String,

    /// Granularity of the bootstrap wait loop (milliseconds)
    pub bootstrap_poll_millis: u64,

    /// Spacing between bootstrap connection attempts (seconds)
    pub bootstrap_retry_secs: u64,

    /// Total time bootstrap keeps trying (seconds)
    pub bootstrap_budget_secs: u64,

    /// Connection attempts before bootstrap gives up
    pub bootstrap_max_attempts: u32,

    /// `GetDefaultDevice` attempts before acquisition is abandoned
    pub discover_max_attempts: u32,

    /// Pause after a discovery-triggered reset (seconds)
    pub settle_secs: u64,

    /// `Claim` attempts before escalating to a reset and restart
    pub claim_max_attempts: u32,

    /// How long to wait for `VerifyStart` to be acknowledged (seconds)
    pub verify_start_timeout_secs: u64,

    /// Delay before each restart step (seconds)
    pub restart_delay_secs: u64,

    /// Consecutive unknown errors tolerated before restarting
    pub unknown_error_threshold: u32,

    /// Idle period after which verification is re-armed or restarted (seconds)
    pub idle_timeout_secs: u64,

    /// Minimum age of the last verify start before a forced restart (seconds)
    pub force_restart_after_secs: u64,

    /// Caller activity window inside which a failed round may restart (seconds)
    pub activity_window_secs: u64,

    /// Permanent-disable thresholds
    pub disable: DisablePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            finger: ANY_FINGER.to_string(),
            bootstrap_poll_millis: 250,
            bootstrap_retry_secs: 3,
            bootstrap_budget_secs: 60,
            bootstrap_max_attempts: 5,
            discover_max_attempts: 5,
            settle_secs: 3,
            claim_max_attempts: 3,
            verify_start_timeout_secs: 10,
            restart_delay_secs: 1,
            unknown_error_threshold: 3,
            idle_timeout_secs: 60,
            force_restart_after_secs: 3,
            activity_window_secs: 60,
            disable: DisablePolicy::default(),
        }
    }
}

/// Upper bound for every configured period (seconds)
pub const MAX_PERIOD_SECS: u64 = 24 * 60 * 60;

impl SessionConfig {
    /// Every configured period with its field name, in seconds
    fn periods(&self) -> [(&'static str, u64); 9] {
        [
            ("bootstrap_poll_millis", self.bootstrap_poll_millis / 1000),
            ("bootstrap_retry_secs", self.bootstrap_retry_secs),
            ("bootstrap_budget_secs", self.bootstrap_budget_secs),
            ("settle_secs", self.settle_secs),
            ("verify_start_timeout_secs", self.verify_start_timeout_secs),
            ("restart_delay_secs", self.restart_delay_secs),
            ("idle_timeout_secs", self.idle_timeout_secs),
            ("force_restart_after_secs", self.force_restart_after_secs),
            ("activity_window_secs", self.activity_window_secs),
        ]
    }

    /// Granularity of the bootstrap wait loop
    pub fn bootstrap_poll(&self) -> Duration {
        Duration::from_millis(self.bootstrap_poll_millis)
    }

    /// Spacing between bootstrap attempts
    pub fn bootstrap_retry(&self) -> Duration {
        Duration::from_secs(self.bootstrap_retry_secs)
    }

    /// Total bootstrap budget
    pub fn bootstrap_budget(&self) -> Duration {
        Duration::from_secs(self.bootstrap_budget_secs)
    }

    /// Pause after a discovery-triggered reset
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    /// Deadline for `VerifyStart` to be acknowledged
    pub fn verify_start_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_start_timeout_secs)
    }

    /// Delay before each restart step
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    /// Idle period before verification is re-armed or restarted
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Minimum age of the last verify start for a forced restart
    pub fn force_restart_after(&self) -> Duration {
        Duration::from_secs(self.force_restart_after_secs)
    }

    /// Caller activity window for restarting a failed round
    pub fn activity_window(&self) -> Duration {
        Duration::from_secs(self.activity_window_secs)
    }
}

/// Command line of the privileged device reset helper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetCommandConfig {
    /// Program to run
    pub program: String,

    /// Arguments for a soft reset
    pub args: Vec<String>,

    /// Extra argument appended for a full reset
    pub full_arg: String,
}

impl Default for ResetCommandConfig {
    fn default() -> Self {
        Self {
            program: "sudo".to_string(),
            args: vec![
                "/usr/local/bin/vh-special-sudo".to_string(),
                "restart-fingerprint".to_string(),
            ],
            full_arg: "full".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Host poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis.max(1))
    }

    /// Location of the config file: `$FINGERLOCK_CONFIG`, else the XDG config dir
    pub fn default_path() -> PathBuf {
        std::env::var("FINGERLOCK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("/etc"))
                    .join("fingerlock")
                    .join("daemon.json")
            })
    }

    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load the config at `path`, writing defaults there first if it is missing
    pub fn load_or_create(path: &std::path::Path) -> crate::Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    /// Reject settings the state machine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        let session = &self.session;
        if session.discover_max_attempts == 0
            || session.claim_max_attempts == 0
            || session.bootstrap_max_attempts == 0
        {
            return Err(crate::DaemonError::Config(
                "retry bounds must be at least 1".to_string(),
            ));
        }
        if session.bootstrap_poll_millis == 0 {
            return Err(crate::DaemonError::Config(
                "bootstrap_poll_millis must be positive".to_string(),
            ));
        }
        if let Some((name, _)) = session
            .periods()
            .into_iter()
            .find(|(_, secs)| *secs > MAX_PERIOD_SECS)
        {
            return Err(crate::DaemonError::Config(format!(
                "{name} exceeds {MAX_PERIOD_SECS} seconds"
            )));
        }
        if self.poll_interval_millis / 1000 > MAX_PERIOD_SECS
            || self.recovery.cooldown_secs > MAX_PERIOD_SECS
            || self.recovery.detached_wait_secs > MAX_PERIOD_SECS
        {
            return Err(crate::DaemonError::Config(format!(
                "poll and recovery periods must not exceed {MAX_PERIOD_SECS} seconds"
            )));
        }
        if self.reset.program.is_empty() {
            return Err(crate::DaemonError::Config(
                "reset program must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Helper module for dirs functionality
mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = SessionConfig::default();
        assert_eq!(config.finger, "any");
        assert_eq!(config.discover_max_attempts, 5);
        assert_eq!(config.claim_max_attempts, 3);
        assert_eq!(config.verify_start_timeout(), Duration::from_secs(10));
        assert_eq!(config.restart_delay(), Duration::from_secs(1));
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
        assert_eq!(config.disable.max_failures, 10);
        assert_eq!(config.disable.max_restarts, 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("daemon.json");

        let mut config = DaemonConfig::default();
        config.session.claim_max_attempts = 4;
        config.poll_interval_millis = 50;
        config.save(&path).unwrap();

        let loaded = DaemonConfig::load(&path).unwrap();
        assert_eq!(loaded.session.claim_max_attempts, 4);
        assert_eq!(loaded.poll_interval(), Duration::from_millis(50));
        assert_eq!(loaded.reset, ResetCommandConfig::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.json");
        std::fs::write(&path, r#"{ "session": { "settle_secs": 1 } }"#).unwrap();

        let loaded = DaemonConfig::load(&path).unwrap();
        assert_eq!(loaded.session.settle_secs, 1);
        assert_eq!(loaded.session.claim_max_attempts, 3);
        assert_eq!(loaded.recovery, RecoveryPolicy::default());
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.json");
        assert!(!path.exists());

        DaemonConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let mut config = DaemonConfig::default();
        config.session.claim_max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_periods() {
        let mut config = DaemonConfig::default();
        config.session.verify_start_timeout_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("verify_start_timeout_secs"));

        let mut config = DaemonConfig::default();
        config.recovery.cooldown_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.session.idle_timeout_secs = MAX_PERIOD_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_rejects_huge_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.json");
        std::fs::write(
            &path,
            r#"{ "session": { "verify_start_timeout_secs": 18446744073709551615 } }"#,
        )
        .unwrap();

        assert!(matches!(
            DaemonConfig::load(&path),
            Err(crate::DaemonError::Config(_))
        ));
    }
}
