//! Fingerlock Core - Runtime-free building blocks for fingerprint unlock
//!
//! This crate provides the pieces of the verification state machine that do
//! not talk to the biometric daemon themselves:
//! - The epoch guard that invalidates stale asynchronous continuations
//! - The device recovery tracker (reset cooldown and escalation)
//! - The failure/disable policy
//! - Classification of daemon verification results
//! - Bounded status text and the injectable clock

pub mod clock;
pub mod epoch;
pub mod idle;
pub mod outcome;
pub mod policy;
pub mod recovery;
pub mod status;

pub use clock::{elapsed_since, Clock, SystemClock};
pub use epoch::{Epoch, EpochGuard, EpochStamp};
pub use idle::IdleRestart;
pub use outcome::{Disposition, VerifyOutcome};
pub use policy::{DisablePolicy, FailureCounters};
pub use recovery::{RecoveryPolicy, RecoveryTracker, ResetKind};
pub use status::{StatusText, STATUS_CAPACITY};

/// Finger name passed to `VerifyStart`
pub const ANY_FINGER: &str = "any";

/// Well-known bus name of the fingerprint daemon
pub const FPRINT_BUS_NAME: &str = "net.reactivated.Fprint";

/// Object path of the fingerprint daemon's manager object
pub const FPRINT_MANAGER_PATH: &str = "/net/reactivated/Fprint/Manager";
