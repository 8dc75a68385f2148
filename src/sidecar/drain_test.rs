//! Tests for the drain detection state machine

use super::*;
use chrono::TimeZone;

fn t(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + chrono::Duration::seconds(seconds)
}

fn obs(state: TargetState, at: i64) -> HealthObservation {
    HealthObservation {
        state,
        observed_at: t(at),
        reason: None,
    }
}

#[test]
fn test_starts_watching_and_unarmed() {
    let detector = DrainDetector::new(Duration::from_secs(120));

    assert_eq!(detector.state(), DrainState::Watching);
    assert_eq!(detector.timer(), DrainTimer::default());
    assert_eq!(detector.remaining(t(0)), None);
}

#[test]
fn test_non_draining_observations_never_arm() {
    let mut detector = DrainDetector::new(Duration::from_secs(120));
    let states = [
        TargetState::Initial,
        TargetState::Healthy,
        TargetState::Unhealthy,
        TargetState::Unavailable,
        TargetState::Unknown,
    ];

    for (i, state) in states.iter().cycle().take(50).enumerate() {
        let now = t(i as i64 * 30);
        assert_eq!(detector.observe(&obs(*state, i as i64 * 30), now), Transition::None);
        assert_eq!(detector.check_expiry(now), Transition::None);
    }

    assert_eq!(detector.state(), DrainState::Watching);
    assert!(!detector.timer().armed);
}

#[test]
fn test_first_draining_arms_with_deadline() {
    let mut detector = DrainDetector::new(Duration::from_secs(120));

    let transition = detector.observe(&obs(TargetState::Draining, 60), t(60));

    assert_eq!(transition, Transition::Armed { deadline: t(180) });
    assert_eq!(detector.state(), DrainState::Armed { deadline: t(180) });
    assert_eq!(
        detector.timer(),
        DrainTimer {
            armed: true,
            deadline: Some(t(180)),
        }
    );
}

#[test]
fn test_arming_is_idempotent() {
    let mut detector = DrainDetector::new(Duration::from_secs(120));

    let mut armed = 0;
    for i in 0..10 {
        let at = 60 + i * 5;
        if let Transition::Armed { .. } = detector.observe(&obs(TargetState::Draining, at), t(at)) {
            armed += 1;
        }
    }

    assert_eq!(armed, 1);
    assert_eq!(detector.state(), DrainState::Armed { deadline: t(180) });
}

#[test]
fn test_healthy_after_arming_does_not_disarm() {
    let mut detector = DrainDetector::new(Duration::from_secs(120));
    detector.observe(&obs(TargetState::Draining, 0), t(0));

    assert_eq!(detector.observe(&obs(TargetState::Healthy, 30), t(30)), Transition::None);
    assert_eq!(detector.observe(&obs(TargetState::Unavailable, 60), t(60)), Transition::None);

    assert_eq!(detector.state(), DrainState::Armed { deadline: t(120) });
    assert_eq!(detector.check_expiry(t(120)), Transition::Expired);
}

#[test]
fn test_never_expires_before_deadline() {
    let mut detector = DrainDetector::new(Duration::from_secs(120));
    detector.observe(&obs(TargetState::Draining, 0), t(0));

    assert_eq!(detector.check_expiry(t(0)), Transition::None);
    assert_eq!(detector.check_expiry(t(119)), Transition::None);
    assert_eq!(
        detector.check_expiry(t(120) - chrono::Duration::milliseconds(1)),
        Transition::None
    );
    assert_eq!(detector.check_expiry(t(120)), Transition::Expired);
}

#[test]
fn test_expires_exactly_once() {
    let mut detector = DrainDetector::new(Duration::from_secs(10));
    detector.observe(&obs(TargetState::Draining, 0), t(0));

    assert_eq!(detector.check_expiry(t(10)), Transition::Expired);
    assert_eq!(detector.check_expiry(t(11)), Transition::None);
    assert_eq!(detector.observe(&obs(TargetState::Draining, 12), t(12)), Transition::None);
    assert_eq!(detector.state(), DrainState::Expired);
}

#[test]
fn test_check_expiry_while_watching_is_noop() {
    let mut detector = DrainDetector::new(Duration::ZERO);
    assert_eq!(detector.check_expiry(t(1_000)), Transition::None);
    assert_eq!(detector.state(), DrainState::Watching);
}

#[test]
fn test_zero_wait_expires_on_arming_check() {
    let mut detector = DrainDetector::new(Duration::ZERO);
    detector.observe(&obs(TargetState::Draining, 5), t(5));
    assert_eq!(detector.check_expiry(t(5)), Transition::Expired);
}

#[test]
fn test_remaining_counts_down() {
    let mut detector = DrainDetector::new(Duration::from_secs(120));
    detector.observe(&obs(TargetState::Draining, 60), t(60));

    assert_eq!(detector.remaining(t(60)), Some(Duration::from_secs(120)));
    assert_eq!(detector.remaining(t(150)), Some(Duration::from_secs(30)));
    assert_eq!(detector.remaining(t(200)), Some(Duration::ZERO));
}

#[test]
fn test_huge_wait_saturates_deadline() {
    let mut detector = DrainDetector::new(Duration::from_secs(u64::MAX));
    let transition = detector.observe(&obs(TargetState::Draining, 0), t(0));

    assert_eq!(
        transition,
        Transition::Armed {
            deadline: DateTime::<Utc>::MAX_UTC
        }
    );
    assert_eq!(detector.check_expiry(t(1_000_000)), Transition::None);
}

/// Poll interval 30s, wait 120s: arm at 60, fire at 180
#[test]
fn test_draining_scenario_timeline() {
    let mut detector = DrainDetector::new(Duration::from_secs(120));
    let timeline = [
        (0, TargetState::Healthy),
        (30, TargetState::Healthy),
        (60, TargetState::Draining),
        (90, TargetState::Draining),
        (120, TargetState::Draining),
        (150, TargetState::Draining),
        (180, TargetState::Draining),
    ];

    let mut armed_at = None;
    let mut fired_at = None;
    for (at, state) in timeline {
        if let Transition::Armed { .. } = detector.observe(&obs(state, at), t(at)) {
            armed_at = Some(at);
        }
        if detector.check_expiry(t(at)) == Transition::Expired {
            fired_at = Some(at);
        }
    }

    assert_eq!(armed_at, Some(60));
    assert_eq!(fired_at, Some(180));
}
