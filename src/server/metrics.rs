//! Prometheus metrics for the drain sidecar

use crate::sidecar::poller::TargetState;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics shared between the poll loop and the `/metrics` handler
pub type SharedMetrics = Arc<SidecarMetrics>;

pub struct SidecarMetrics {
    registry: Registry,
    polls_total: IntCounterVec,
    poll_retries_total: IntCounter,
    target_state: IntGaugeVec,
    drain_armed: IntGauge,
}

impl SidecarMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let polls_total = IntCounterVec::new(
            Opts::new("drainwatch_polls_total", "Target health poll cycles by result"),
            &["result"],
        )?;
        let poll_retries_total = IntCounter::new(
            "drainwatch_poll_retries_total",
            "Target health queries retried after a transient failure",
        )?;
        let target_state = IntGaugeVec::new(
            Opts::new(
                "drainwatch_target_state",
                "Last observed target state (1 for the current state)",
            ),
            &["state"],
        )?;
        let drain_armed = IntGauge::new(
            "drainwatch_drain_armed",
            "Whether the shutdown timer has been armed",
        )?;

        registry.register(Box::new(polls_total.clone()))?;
        registry.register(Box::new(poll_retries_total.clone()))?;
        registry.register(Box::new(target_state.clone()))?;
        registry.register(Box::new(drain_armed.clone()))?;

        Ok(Self {
            registry,
            polls_total,
            poll_retries_total,
            target_state,
            drain_armed,
        })
    }

    pub fn record_poll(&self, ok: bool) {
        let result = if ok { "ok" } else { "failed" };
        self.polls_total.with_label_values(&[result]).inc();
    }

    pub fn record_retry(&self) {
        self.poll_retries_total.inc();
    }

    pub fn set_target_state(&self, current: TargetState) {
        for state in TargetState::ALL {
            let value = i64::from(state == current);
            self.target_state
                .with_label_values(&[state.as_str()])
                .set(value);
        }
    }

    pub fn set_drain_armed(&self, armed: bool) {
        self.drain_armed.set(i64::from(armed));
    }

    /// Render all metrics in Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(SidecarMetrics::new()?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_counters() {
        let metrics = create_metrics().unwrap();
        metrics.record_poll(true);
        metrics.record_poll(true);
        metrics.record_poll(false);
        metrics.record_retry();

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"drainwatch_polls_total{result="ok"} 2"#));
        assert!(text.contains(r#"drainwatch_polls_total{result="failed"} 1"#));
        assert!(text.contains("drainwatch_poll_retries_total 1"));
    }

    #[test]
    fn test_target_state_is_one_hot() {
        let metrics = create_metrics().unwrap();
        metrics.set_target_state(TargetState::Healthy);
        metrics.set_target_state(TargetState::Draining);

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"drainwatch_target_state{state="draining"} 1"#));
        assert!(text.contains(r#"drainwatch_target_state{state="healthy"} 0"#));
    }

    #[test]
    fn test_drain_armed_gauge() {
        let metrics = create_metrics().unwrap();
        assert!(metrics.encode().unwrap().contains("drainwatch_drain_armed 0"));

        metrics.set_drain_armed(true);
        assert!(metrics.encode().unwrap().contains("drainwatch_drain_armed 1"));
    }
}
