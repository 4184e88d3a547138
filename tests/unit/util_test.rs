//! Tests for utility functions

use std::time::Duration;

use prometheus_browser_pool::core::Dependencies;
use prometheus_browser_pool::util::{duration_ms, new_id, now_ms, Clock, ManualClock, SystemClock};

#[test]
fn test_manual_clock_advances_only_when_told() {
    let clock = ManualClock::new(1_000);
    assert_eq!(clock.now_ms(), 1_000);
    clock.advance(Duration::from_millis(250));
    assert_eq!(clock.now_ms(), 1_250);
    clock.set(5);
    assert_eq!(clock.now_ms(), 5);
}

#[test]
fn test_system_clock_tracks_wall_time() {
    let before = now_ms();
    let observed = SystemClock.now_ms();
    assert!(observed >= before);
}

#[test]
fn test_duration_ms_saturates() {
    assert_eq!(duration_ms(Duration::from_secs(2)), 2_000);
    assert_eq!(duration_ms(Duration::MAX), u64::MAX);
}

#[test]
fn test_ids_are_unique() {
    assert_ne!(new_id(), new_id());
}

#[test]
fn test_dependencies_resolve_by_type() {
    struct Credentials(&'static str);

    let deps = Dependencies::new().with(Credentials("secret")).with(42_u32);
    assert_eq!(deps.len(), 2);
    assert_eq!(deps.get::<Credentials>().unwrap().0, "secret");
    assert_eq!(*deps.require::<u32>().unwrap(), 42);
    assert!(deps.get::<String>().is_none());
    assert!(deps.require::<String>().is_err());
}

#[test]
fn test_init_tracing_is_idempotent() {
    prometheus_browser_pool::util::init_tracing();
    prometheus_browser_pool::util::init_tracing();
}
