//! Drain detection state machine
//!
//! `Watching -> Armed -> Expired`. The first DRAINING observation arms the
//! timer with `deadline = now + deregistration_wait`. Once armed the timer is
//! never reset or cancelled, whatever the load balancer reports afterwards.
//! `Expired` is terminal and is entered exactly once.
//!
//! The detector does no I/O and never reads the clock itself: callers pass
//! `now`, so it can be driven entirely from tests.

use super::poller::{HealthObservation, TargetState};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Countdown armed by the first DRAINING observation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainTimer {
    pub armed: bool,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Watching,
    Armed { deadline: DateTime<Utc> },
    Expired,
}

/// What changed as a result of feeding the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    Armed { deadline: DateTime<Utc> },
    Expired,
}

#[derive(Debug)]
pub struct DrainDetector {
    deregistration_wait: Duration,
    timer: DrainTimer,
    expired: bool,
}

impl DrainDetector {
    pub fn new(deregistration_wait: Duration) -> Self {
        Self {
            deregistration_wait,
            timer: DrainTimer::default(),
            expired: false,
        }
    }

    pub fn state(&self) -> DrainState {
        match (self.expired, self.timer.deadline) {
            (true, _) => DrainState::Expired,
            (false, Some(deadline)) => DrainState::Armed { deadline },
            (false, None) => DrainState::Watching,
        }
    }

    pub fn timer(&self) -> DrainTimer {
        self.timer
    }

    /// Feed one health observation
    pub fn observe(&mut self, observation: &HealthObservation, now: DateTime<Utc>) -> Transition {
        match self.state() {
            DrainState::Watching if observation.state == TargetState::Draining => {
                let deadline = self.deadline_from(now);
                self.timer = DrainTimer {
                    armed: true,
                    deadline: Some(deadline),
                };
                info!(
                    wait_secs = self.deregistration_wait.as_secs(),
                    deadline = %deadline,
                    reason = observation.reason.as_deref().unwrap_or(""),
                    "Target is draining, shutdown timer armed"
                );
                Transition::Armed { deadline }
            }
            DrainState::Watching => {
                debug!(state = %observation.state, "Target not draining");
                Transition::None
            }
            DrainState::Armed { deadline } => {
                if observation.state == TargetState::Draining {
                    debug!(deadline = %deadline, "Target still draining");
                } else {
                    warn!(
                        state = %observation.state,
                        deadline = %deadline,
                        "Target left draining state, shutdown timer stays armed"
                    );
                }
                Transition::None
            }
            DrainState::Expired => Transition::None,
        }
    }

    /// Move to `Expired` once `now` reaches the deadline; fires at most once
    pub fn check_expiry(&mut self, now: DateTime<Utc>) -> Transition {
        match self.state() {
            DrainState::Armed { deadline } if now >= deadline => {
                self.expired = true;
                info!(deadline = %deadline, "Deregistration wait elapsed");
                Transition::Expired
            }
            _ => Transition::None,
        }
    }

    /// Time left before the armed timer expires, `None` unless armed
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self.state() {
            DrainState::Armed { deadline } => {
                Some((deadline - now).to_std().unwrap_or(Duration::ZERO))
            }
            _ => None,
        }
    }

    fn deadline_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.deregistration_wait)
            .ok()
            .and_then(|wait| now.checked_add_signed(wait))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "drain_test.rs"]
mod tests;
