//! Tests for environment configuration

use super::*;
use std::collections::HashMap;

fn config_from(pairs: &[(&str, &str)]) -> SidecarConfig {
    let env: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    SidecarConfig::from_lookup(|key| env.get(key).cloned())
}

#[test]
fn test_defaults_when_environment_empty() {
    let config = config_from(&[]);

    assert_eq!(config.metadata_uri, DEFAULT_METADATA_URI);
    assert_eq!(config.deregistration_wait, Duration::from_secs(120));
    assert_eq!(config.poll_interval, Duration::from_secs(30));
    assert_eq!(config.max_consecutive_failures, 5);
    assert_eq!(config.retry, RetryPolicy::default());
    assert_eq!(config.target_container_name, None);
    assert_eq!(config.target_container_port, None);
    assert_eq!(config.health_port, None);
}

#[test]
fn test_reads_all_values() {
    let config = config_from(&[
        ("ECS_CONTAINER_METADATA_URI_V4", "http://169.254.170.2/v4/abc-123/"),
        ("DEREGISTRATION_WAIT", "300"),
        ("POLL_INTERVAL", "10"),
        ("MAX_CONSECUTIVE_POLL_FAILURES", "3"),
        ("HEALTH_RETRY_MAX_ATTEMPTS", "6"),
        ("HEALTH_RETRY_BASE_DELAY_MS", "500"),
        ("HEALTH_RETRY_MULTIPLIER", "2.0"),
        ("TARGET_CONTAINER_NAME", "app"),
        ("TARGET_CONTAINER_PORT", "8080"),
        ("HEALTH_PORT", "9901"),
    ]);

    assert_eq!(config.metadata_uri, "http://169.254.170.2/v4/abc-123");
    assert_eq!(config.deregistration_wait, Duration::from_secs(300));
    assert_eq!(config.poll_interval, Duration::from_secs(10));
    assert_eq!(config.max_consecutive_failures, 3);
    assert_eq!(config.retry.max_attempts, 6);
    assert_eq!(config.retry.base_delay, Duration::from_millis(500));
    assert_eq!(config.retry.multiplier, 2.0);
    assert_eq!(config.target_container_name.as_deref(), Some("app"));
    assert_eq!(config.target_container_port, Some(8080));
    assert_eq!(config.health_port, Some(9901));
}

#[test]
fn test_non_numeric_deregistration_wait_falls_back() {
    let config = config_from(&[("DEREGISTRATION_WAIT", "two minutes")]);
    assert_eq!(config.deregistration_wait, DEFAULT_DEREGISTRATION_WAIT);
}

#[test]
fn test_zero_deregistration_wait_is_allowed() {
    let config = config_from(&[("DEREGISTRATION_WAIT", "0")]);
    assert_eq!(config.deregistration_wait, Duration::ZERO);
}

#[test]
fn test_zero_values_rejected_where_positive_required() {
    let config = config_from(&[
        ("POLL_INTERVAL", "0"),
        ("MAX_CONSECUTIVE_POLL_FAILURES", "0"),
        ("HEALTH_RETRY_MAX_ATTEMPTS", "0"),
    ]);

    assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
    assert_eq!(config.max_consecutive_failures, DEFAULT_MAX_CONSECUTIVE_FAILURES);
    assert_eq!(config.retry.max_attempts, DEFAULT_RETRY_MAX_ATTEMPTS);
}

#[test]
fn test_shrinking_multiplier_rejected() {
    let config = config_from(&[("HEALTH_RETRY_MULTIPLIER", "0.5")]);
    assert_eq!(config.retry.multiplier, DEFAULT_RETRY_MULTIPLIER);
}

#[test]
fn test_invalid_ports_are_ignored() {
    let config = config_from(&[("TARGET_CONTAINER_PORT", "99999"), ("HEALTH_PORT", "0")]);
    assert_eq!(config.target_container_port, None);
    assert_eq!(config.health_port, None);
}

#[test]
fn test_blank_values_treated_as_unset() {
    let config = config_from(&[("TARGET_CONTAINER_NAME", "  "), ("DEREGISTRATION_WAIT", "")]);
    assert_eq!(config.target_container_name, None);
    assert_eq!(config.deregistration_wait, DEFAULT_DEREGISTRATION_WAIT);
}

#[test]
fn test_retry_delays_grow_exponentially() {
    let policy = RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_millis(2000),
        multiplier: 1.5,
    };

    assert_eq!(policy.delay_after(1), Duration::from_millis(2000));
    assert_eq!(policy.delay_after(2), Duration::from_millis(3000));
    assert_eq!(policy.delay_after(3), Duration::from_millis(4500));
}

#[test]
fn test_large_multiplier_delays_are_capped() {
    let config = config_from(&[
        ("HEALTH_RETRY_MULTIPLIER", "1000"),
        ("HEALTH_RETRY_MAX_ATTEMPTS", "10"),
    ]);
    assert_eq!(config.retry.multiplier, 1000.0);

    let delays: Vec<Duration> = (1..=config.retry.max_attempts)
        .map(|attempt| config.retry.delay_after(attempt))
        .collect();

    assert_eq!(delays[0], DEFAULT_RETRY_BASE_DELAY);
    assert!(delays[1..].iter().all(|d| *d == MAX_RETRY_DELAY));
}

#[test]
fn test_overflowing_delay_is_capped() {
    let policy = RetryPolicy {
        max_attempts: u32::MAX,
        base_delay: Duration::from_millis(u64::MAX),
        multiplier: f64::MAX,
    };

    assert_eq!(policy.delay_after(1), MAX_RETRY_DELAY);
    assert_eq!(policy.delay_after(u32::MAX), MAX_RETRY_DELAY);
}

#[test]
fn test_health_call_timeout() {
    assert_eq!(config_from(&[]).health_call_timeout, DEFAULT_HEALTH_CALL_TIMEOUT);

    let config = config_from(&[("HEALTH_CALL_TIMEOUT_MS", "2500")]);
    assert_eq!(config.health_call_timeout, Duration::from_millis(2500));

    let config = config_from(&[("HEALTH_CALL_TIMEOUT_MS", "0")]);
    assert_eq!(config.health_call_timeout, DEFAULT_HEALTH_CALL_TIMEOUT);
}
