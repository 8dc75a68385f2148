//! Startup sequence and the driving loop
//!
//! `bootstrap` resolves identity and target once and validates access with an
//! initial health query. `Runner` then owns the `DrainDetector` and the
//! consecutive failure counter, so both are only ever touched from one place:
//! poll, feed the state machine, check expiry, sleep, repeat.

use super::clock::Clock;
use super::drain::{DrainDetector, DrainState, Transition};
use super::identity::{self, PortSelection, TaskIdentity};
use super::poller::{HealthObservation, HealthPoller};
use super::target::{self, TargetReference};
use super::termination::{Outcome, TerminationTrigger};
use crate::aws::{ControlPlane, TaskMetadataSource};
use crate::error::SidecarError;
use crate::server::metrics::SharedMetrics;
use crate::server::ReadinessState;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Resolve who we are and which target we watch
pub async fn bootstrap(
    metadata: &dyn TaskMetadataSource,
    control_plane: &dyn ControlPlane,
    poller: &HealthPoller,
    selection: &PortSelection,
) -> Result<(TaskIdentity, TargetReference), SidecarError> {
    let identity = identity::resolve(metadata, selection).await?;
    let target = target::resolve(control_plane, &identity).await?;

    let initial = poller.poll_once(&target).await.map_err(|e| {
        SidecarError::TargetResolutionFailed(format!("initial target health check: {}", e))
    })?;
    info!(
        target_id = %target.target_id,
        port = target.target_port,
        state = %initial.state,
        "Initial target state"
    );

    Ok((identity, target))
}

/// Drive `work` to its outcome unless a termination signal arrives first
///
/// A signal pre-empts `work` wherever it is, startup included, and yields
/// `Outcome::Signalled`. Errors from `work`, such as an exhausted poll failure
/// budget, are logged and reported as `Outcome::Fatal`, as is a failure to
/// install the signal handlers.
pub async fn run_until_signal<W, S>(work: W, signal: S) -> Outcome
where
    W: Future<Output = Result<Outcome, SidecarError>>,
    S: Future<Output = std::io::Result<&'static str>>,
{
    tokio::select! {
        result = work => match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Stopping on fatal error");
                Outcome::Fatal
            }
        },
        signal = signal => match signal {
            Ok(name) => {
                info!(signal = name, "Termination signal received, not waiting for drain");
                Outcome::Signalled(name)
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handlers");
                Outcome::Fatal
            }
        },
    }
}

pub struct Runner {
    poller: HealthPoller,
    detector: DrainDetector,
    clock: Arc<dyn Clock>,
    trigger: Arc<dyn TerminationTrigger>,
    poll_interval: Duration,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    metrics: Option<SharedMetrics>,
    readiness: Option<ReadinessState>,
}

impl Runner {
    pub fn new(
        poller: HealthPoller,
        detector: DrainDetector,
        clock: Arc<dyn Clock>,
        trigger: Arc<dyn TerminationTrigger>,
        poll_interval: Duration,
        max_consecutive_failures: u32,
    ) -> Self {
        Self {
            poller,
            detector,
            clock,
            trigger,
            poll_interval,
            max_consecutive_failures: max_consecutive_failures.max(1),
            consecutive_failures: 0,
            metrics: None,
            readiness: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Readiness is withdrawn as soon as the drain timer is armed
    pub fn with_readiness(mut self, readiness: ReadinessState) -> Self {
        self.readiness = Some(readiness);
        self
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn drain_state(&self) -> DrainState {
        self.detector.state()
    }

    /// Poll until the drain timer expires or the failure budget runs out
    ///
    /// Returns `Outcome::Drained` after firing the termination trigger once.
    pub async fn run(&mut self, target: &TargetReference) -> Result<Outcome, SidecarError> {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            max_consecutive_failures = self.max_consecutive_failures,
            "Watching target health"
        );
        loop {
            if let Some(outcome) = self.cycle(target).await? {
                return Ok(outcome);
            }
            let delay = self.next_delay();
            self.clock.sleep(delay).await;
        }
    }

    /// One poll cycle: check expiry, poll, feed the detector, check expiry again
    pub async fn cycle(&mut self, target: &TargetReference) -> Result<Option<Outcome>, SidecarError> {
        if self.expire_if_due(target) {
            return Ok(Some(Outcome::Drained));
        }

        match self.poller.poll_once(target).await {
            Ok(observation) => self.on_observation(&observation),
            Err(e) => self.on_poll_failure(e)?,
        }

        if self.expire_if_due(target) {
            return Ok(Some(Outcome::Drained));
        }
        Ok(None)
    }

    fn on_observation(&mut self, observation: &HealthObservation) {
        if self.consecutive_failures > 0 {
            info!(
                failures = self.consecutive_failures,
                "Target health query recovered"
            );
        }
        self.consecutive_failures = 0;
        if let Some(ref metrics) = self.metrics {
            metrics.record_poll(true);
            metrics.set_target_state(observation.state);
        }

        let now = self.clock.now();
        if let Transition::Armed { .. } = self.detector.observe(observation, now) {
            if let Some(ref metrics) = self.metrics {
                metrics.set_drain_armed(true);
            }
            if let Some(ref readiness) = self.readiness {
                readiness.set_not_ready();
            }
        }
    }

    fn on_poll_failure(&mut self, err: SidecarError) -> Result<(), SidecarError> {
        if let Some(ref metrics) = self.metrics {
            metrics.record_poll(false);
        }

        if let DrainState::Armed { deadline } = self.detector.state() {
            warn!(error = %err, deadline = %deadline, "Poll failed while draining, timer unaffected");
            return Ok(());
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.max_consecutive_failures {
            error!(
                error = %err,
                failures = self.consecutive_failures,
                "Poll failure budget exhausted"
            );
            return Err(SidecarError::PollBudgetExhausted {
                failures: self.consecutive_failures,
            });
        }

        warn!(
            error = %err,
            failures = self.consecutive_failures,
            max = self.max_consecutive_failures,
            "Poll cycle failed"
        );
        Ok(())
    }

    fn expire_if_due(&mut self, target: &TargetReference) -> bool {
        if self.detector.check_expiry(self.clock.now()) == Transition::Expired {
            self.trigger.trigger(target);
            return true;
        }
        false
    }

    /// Sleep until the next poll, or until the deadline if that comes first
    fn next_delay(&self) -> Duration {
        match self.detector.remaining(self.clock.now()) {
            Some(remaining) => remaining.min(self.poll_interval),
            None => self.poll_interval,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "runner_test.rs"]
mod tests;
