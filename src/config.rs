//! Sidecar configuration from environment variables
//!
//! Invalid values never abort startup: they are logged and replaced by the default.

use std::time::Duration;
use tracing::warn;

/// Metadata endpoint used when ECS did not inject one
pub const DEFAULT_METADATA_URI: &str = "http://169.254.170.2/v4";

/// How long to keep serving after the target starts draining
pub const DEFAULT_DEREGISTRATION_WAIT: Duration = Duration::from_secs(120);

/// Interval between target health polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive failed poll cycles tolerated before exiting
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(2000);
pub const DEFAULT_RETRY_MULTIPLIER: f64 = 1.5;

/// Ceiling for a single backoff delay, whatever the multiplier
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Upper bound for one describe-target-health call
pub const DEFAULT_HEALTH_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Backoff parameters for a single poll cycle
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based), capped at `MAX_RETRY_DELAY`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SidecarConfig {
    pub metadata_uri: String,
    pub deregistration_wait: Duration,
    pub poll_interval: Duration,
    pub max_consecutive_failures: u32,
    pub retry: RetryPolicy,
    pub health_call_timeout: Duration,
    /// Container whose port mapping is registered with the load balancer
    pub target_container_name: Option<String>,
    /// Explicit registered port, overrides anything read from metadata
    pub target_container_port: Option<u16>,
    /// Port for the sidecar's own health endpoint; `None` disables it
    pub health_port: Option<u16>,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            metadata_uri: DEFAULT_METADATA_URI.to_string(),
            deregistration_wait: DEFAULT_DEREGISTRATION_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            retry: RetryPolicy::default(),
            health_call_timeout: DEFAULT_HEALTH_CALL_TIMEOUT,
            target_container_name: None,
            target_container_port: None,
            health_port: None,
        }
    }
}

impl SidecarConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// Tests pass a map here instead of mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let metadata_uri = match non_empty(&lookup, "ECS_CONTAINER_METADATA_URI_V4") {
            Some(uri) => uri.trim_end_matches('/').to_string(),
            None => {
                warn!(
                    default = DEFAULT_METADATA_URI,
                    "ECS_CONTAINER_METADATA_URI_V4 not set, using default"
                );
                defaults.metadata_uri
            }
        };

        let deregistration_wait = Duration::from_secs(parse_or(
            &lookup,
            "DEREGISTRATION_WAIT",
            DEFAULT_DEREGISTRATION_WAIT.as_secs(),
            |_| true,
        ));
        let poll_interval = Duration::from_secs(parse_or(
            &lookup,
            "POLL_INTERVAL",
            DEFAULT_POLL_INTERVAL.as_secs(),
            |v| *v > 0,
        ));
        let max_consecutive_failures = parse_or(
            &lookup,
            "MAX_CONSECUTIVE_POLL_FAILURES",
            DEFAULT_MAX_CONSECUTIVE_FAILURES,
            |v| *v > 0,
        );

        let retry = RetryPolicy {
            max_attempts: parse_or(
                &lookup,
                "HEALTH_RETRY_MAX_ATTEMPTS",
                DEFAULT_RETRY_MAX_ATTEMPTS,
                |v| *v > 0,
            ),
            base_delay: Duration::from_millis(parse_or(
                &lookup,
                "HEALTH_RETRY_BASE_DELAY_MS",
                DEFAULT_RETRY_BASE_DELAY.as_millis() as u64,
                |_| true,
            )),
            multiplier: parse_or(
                &lookup,
                "HEALTH_RETRY_MULTIPLIER",
                DEFAULT_RETRY_MULTIPLIER,
                |v| v.is_finite() && *v >= 1.0,
            ),
        };

        let health_call_timeout = Duration::from_millis(parse_or(
            &lookup,
            "HEALTH_CALL_TIMEOUT_MS",
            DEFAULT_HEALTH_CALL_TIMEOUT.as_millis() as u64,
            |v| *v > 0,
        ));

        let target_container_port = non_empty(&lookup, "TARGET_CONTAINER_PORT")
            .and_then(|raw| parse_port("TARGET_CONTAINER_PORT", &raw));
        let health_port =
            non_empty(&lookup, "HEALTH_PORT").and_then(|raw| parse_port("HEALTH_PORT", &raw));

        Self {
            metadata_uri,
            deregistration_wait,
            poll_interval,
            max_consecutive_failures,
            retry,
            health_call_timeout,
            target_container_name: non_empty(&lookup, "TARGET_CONTAINER_NAME"),
            target_container_port,
            health_port,
        }
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T, valid: impl Fn(&T) -> bool) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    let Some(raw) = non_empty(lookup, key) else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            warn!(key, value = %raw, default = %default, "Invalid configuration value, using default");
            default
        }
    }
}

fn parse_port(key: &str, raw: &str) -> Option<u16> {
    match raw.parse::<u16>() {
        Ok(port) if port > 0 => Some(port),
        _ => {
            warn!(key, value = %raw, "Invalid port, ignoring");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "config_test.rs"]
mod tests;
