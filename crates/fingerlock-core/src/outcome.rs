//! Classification of `VerifyStatus` results reported by the daemon

use std::fmt;

/// A verification result code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerifyOutcome {
    /// `verify-retry-scan`
    RetryScan,
    /// `verify-swipe-too-short`
    SwipeTooShort,
    /// `verify-finger-not-centered`
    FingerNotCentered,
    /// `verify-remove-and-retry`
    RemoveAndRetry,
    /// `verify-unknown-error`
    UnknownError,
    /// `verify-disconnected`
    Disconnected,
    /// `verify-match`
    Match,
    /// `verify-no-match`
    NoMatch,
    /// Anything else, kept verbatim
    Other(String),
}

/// What the session does with an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Scan-quality problem; verification continues with the given hint
    RetrySilently(&'static str),
    /// Ambiguous failure, counted toward the unknown-error streak
    UnknownError,
    /// The reader went away
    Disconnected,
    /// Honest failed match
    NoMatch,
    /// Successful match
    Match,
    /// Unrecognised code, surfaced verbatim
    Unrecognized,
}

impl VerifyOutcome {
    /// Parse a result string from the daemon
    pub fn parse(result: &str) -> Self {
        match result {
            "verify-retry-scan" => Self::RetryScan,
            "verify-swipe-too-short" => Self::SwipeTooShort,
            "verify-finger-not-centered" => Self::FingerNotCentered,
            "verify-remove-and-retry" => Self::RemoveAndRetry,
            "verify-unknown-error" => Self::UnknownError,
            "verify-disconnected" => Self::Disconnected,
            "verify-match" => Self::Match,
            "verify-no-match" => Self::NoMatch,
            other => Self::Other(other.to_string()),
        }
    }

    /// The daemon's string for this outcome
    pub fn as_str(&self) -> &str {
        match self {
            Self::RetryScan => "verify-retry-scan",
            Self::SwipeTooShort => "verify-swipe-too-short",
            Self::FingerNotCentered => "verify-finger-not-centered",
            Self::RemoveAndRetry => "verify-remove-and-retry",
            Self::UnknownError => "verify-unknown-error",
            Self::Disconnected => "verify-disconnected",
            Self::Match => "verify-match",
            Self::NoMatch => "verify-no-match",
            Self::Other(other) => other,
        }
    }

    /// How the session reacts to this outcome
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::RetryScan => Disposition::RetrySilently("Retry"),
            Self::SwipeTooShort => Disposition::RetrySilently("Retry, too short"),
            Self::FingerNotCentered => Disposition::RetrySilently("Retry, not centered"),
            Self::RemoveAndRetry => Disposition::RetrySilently("Remove and retry"),
            Self::UnknownError => Disposition::UnknownError,
            Self::Disconnected => Disposition::Disconnected,
            Self::Match => Disposition::Match,
            Self::NoMatch => Disposition::NoMatch,
            Self::Other(_) => Disposition::Unrecognized,
        }
    }

    /// Whether this is a successful match
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }
}

impl From<&str> for VerifyOutcome {
    fn from(result: &str) -> Self {
        Self::parse(result)
    }
}

impl fmt::Display for VerifyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
