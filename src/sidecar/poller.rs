//! Target health polling
//!
//! One `poll_once` call is one poll cycle: a describe-target-health request,
//! retried with exponential backoff on transient failures, up to
//! `RetryPolicy::max_attempts`. If every attempt fails the cycle fails with
//! `PollFailed`; counting consecutive failed cycles is the runner's job.
//! Each attempt is bounded by the call timeout, and an elapsed timeout counts
//! as a transient failure.

use super::clock::Clock;
use super::target::TargetReference;
use crate::aws::{TargetHealthEntry, TargetHealthSource};
use crate::config::{RetryPolicy, DEFAULT_HEALTH_CALL_TIMEOUT};
use crate::error::{CallError, SidecarError};
use crate::server::metrics::SharedMetrics;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Load balancer view of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetState {
    Initial,
    Healthy,
    Unhealthy,
    Draining,
    Unavailable,
    Unknown,
}

impl TargetState {
    pub const ALL: [TargetState; 6] = [
        TargetState::Initial,
        TargetState::Healthy,
        TargetState::Unhealthy,
        TargetState::Draining,
        TargetState::Unavailable,
        TargetState::Unknown,
    ];

    /// Map an ELB target health state string
    pub fn parse(raw: &str) -> Result<Self, SidecarError> {
        match raw {
            "initial" => Ok(TargetState::Initial),
            "healthy" => Ok(TargetState::Healthy),
            "unhealthy" => Ok(TargetState::Unhealthy),
            "draining" | "unhealthy.draining" => Ok(TargetState::Draining),
            "unavailable" | "unused" => Ok(TargetState::Unavailable),
            other => Err(SidecarError::UnexpectedTargetState(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetState::Initial => "initial",
            TargetState::Healthy => "healthy",
            TargetState::Unhealthy => "unhealthy",
            TargetState::Draining => "draining",
            TargetState::Unavailable => "unavailable",
            TargetState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one successful poll cycle
#[derive(Debug, Clone, PartialEq)]
pub struct HealthObservation {
    pub state: TargetState,
    pub observed_at: DateTime<Utc>,
    pub reason: Option<String>,
}

pub struct HealthPoller {
    source: Arc<dyn TargetHealthSource>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    call_timeout: Duration,
    metrics: Option<SharedMetrics>,
}

impl HealthPoller {
    pub fn new(
        source: Arc<dyn TargetHealthSource>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            clock,
            retry,
            call_timeout: DEFAULT_HEALTH_CALL_TIMEOUT,
            metrics: None,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one poll cycle for the given target
    pub async fn poll_once(
        &self,
        target: &TargetReference,
    ) -> Result<HealthObservation, SidecarError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.describe(target).await {
                Ok(entries) => return Ok(self.observe(target, &entries)),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Target health query failed, backing off"
                    );
                    if let Some(ref metrics) = self.metrics {
                        metrics.record_retry();
                    }
                    self.clock.sleep(delay).await;
                }
                Err(e) => {
                    return Err(SidecarError::PollFailed {
                        attempts: attempt,
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    async fn describe(
        &self,
        target: &TargetReference,
    ) -> Result<Vec<TargetHealthEntry>, CallError> {
        let call = self.source.describe_target_health(&target.target_group_arn);
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CallError::Transient(format!(
                "no response within {}ms",
                self.call_timeout.as_millis()
            ))),
        }
    }

    fn observe(&self, target: &TargetReference, entries: &[TargetHealthEntry]) -> HealthObservation {
        let observed_at = self.clock.now();
        let Some(entry) = find_entry(target, entries) else {
            debug!(
                target_id = %target.target_id,
                port = target.target_port,
                "Target not present in target group"
            );
            return HealthObservation {
                state: TargetState::Unavailable,
                observed_at,
                reason: Some("target not registered in target group".to_string()),
            };
        };

        let reason = entry.reason.clone().or_else(|| entry.description.clone());
        let state = match entry.state.as_deref() {
            Some(raw) => match TargetState::parse(raw) {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "Treating target state as unknown");
                    TargetState::Unknown
                }
            },
            None => TargetState::Unknown,
        };

        HealthObservation {
            state,
            observed_at,
            reason,
        }
    }
}

fn find_entry<'a>(
    target: &TargetReference,
    entries: &'a [TargetHealthEntry],
) -> Option<&'a TargetHealthEntry> {
    entries
        .iter()
        .find(|e| e.target_id == target.target_id && e.port == Some(target.target_port))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "poller_test.rs"]
mod tests;
