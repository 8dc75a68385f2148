//! Error taxonomy for the drain sidecar
//!
//! Startup errors (`IdentityUnavailable`, `TargetResolutionFailed`) are fatal.
//! `PollFailed` is per-cycle and only becomes fatal as `PollBudgetExhausted`
//! once the consecutive failure budget runs out.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("task identity unavailable: {0}")]
    IdentityUnavailable(String),

    #[error("target resolution failed: {0}")]
    TargetResolutionFailed(String),

    #[error("target health poll failed after {attempts} attempt(s): {message}")]
    PollFailed { attempts: u32, message: String },

    #[error("giving up after {failures} consecutive failed poll cycles")]
    PollBudgetExhausted { failures: u32 },

    #[error("unexpected target state: {0}")]
    UnexpectedTargetState(String),
}

impl SidecarError {
    /// Whether this error terminates the process with a non-zero status
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SidecarError::PollFailed { .. } | SidecarError::UnexpectedTargetState(_)
        )
    }
}

/// Failure of a single outbound call, classified for the retry policy
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// Timeouts, dispatch failures, throttling and 5xx responses
    #[error("transient: {0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl CallError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CallError::Transient(_))
    }
}
