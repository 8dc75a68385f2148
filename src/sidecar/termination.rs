//! Termination trigger and process outcomes
//!
//! The sidecar runs as an essential container, so its own exit makes ECS stop
//! every other container in the task with SIGTERM. Triggering termination
//! therefore means: stop advertising readiness, log, and let `main` return a
//! zero exit status.

use super::target::TargetReference;
use crate::server::ReadinessState;
use std::process::ExitCode;
use tracing::info;

/// How the sidecar process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Deregistration wait elapsed after the target started draining
    Drained,
    /// SIGTERM/SIGINT received from the platform
    Signalled(&'static str),
    /// Startup failed or the poll failure budget ran out
    Fatal,
}

impl Outcome {
    /// Process exit status: 0 for deliberate shutdowns, 1 for fatal errors
    pub fn exit_status(&self) -> u8 {
        match self {
            Outcome::Drained | Outcome::Signalled(_) => 0,
            Outcome::Fatal => 1,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Outcome::Fatal)
    }
}

/// Invoked once when the drain timer expires
pub trait TerminationTrigger: Send + Sync {
    fn trigger(&self, target: &TargetReference);
}

/// Production trigger: the process exit is the termination signal
pub struct ExitTrigger {
    readiness: Option<ReadinessState>,
}

impl ExitTrigger {
    pub fn new(readiness: Option<ReadinessState>) -> Self {
        Self { readiness }
    }
}

impl TerminationTrigger for ExitTrigger {
    fn trigger(&self, target: &TargetReference) {
        if let Some(ref readiness) = self.readiness {
            readiness.set_not_ready();
        }
        info!(
            target_group = %target.target_group_arn,
            target_id = %target.target_id,
            port = target.target_port,
            "Drain complete, exiting so the task's containers are stopped"
        );
    }
}

/// Trigger that records invocations
#[cfg(test)]
pub struct MockTrigger {
    calls: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl MockTrigger {
    pub fn new() -> Self {
        Self {
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
impl TerminationTrigger for MockTrigger {
    fn trigger(&self, _target: &TargetReference) {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}
