//! HTTP server for the sidecar's own health and metrics endpoints
//!
//! Provides:
//! - `/healthz` - Liveness probe (process is running)
//! - `/readyz` - Readiness probe (target resolved and not draining)
//! - `/metrics` - Prometheus metrics
//!
//! Also provides signal handling for SIGTERM/SIGINT.

mod health;
pub mod metrics;
pub mod shutdown;

pub use health::{run_health_server, ReadinessState};
pub use metrics::{create_metrics, SharedMetrics};
pub use shutdown::{shutdown_channel, wait_for_signal, ShutdownController, ShutdownSignal};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
