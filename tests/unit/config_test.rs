//! Tests for pool settings parsing and validation

use std::time::Duration;

use prometheus_browser_pool::config::PoolSettings;

#[test]
fn test_defaults_match_documented_values() {
    let settings = PoolSettings::default();
    assert_eq!(settings.max_degree_of_parallel, 1);
    assert_eq!(settings.max_idle_time(), Duration::from_secs(600));
    assert_eq!(settings.delta_idle_time(), Duration::ZERO);
    assert_eq!(settings.queue_limit, None);
    assert!(!settings.start_browsers_on_run);
    assert!(settings.keep_alive_at_least_one_browser);
    assert_eq!(settings.command_max_runs, 3);
    assert_eq!(settings.browser_max_fail, 3);
    assert_eq!(settings.max_queue_size_per_browser, 3);
    assert_eq!(settings.dispatch_poll_interval(), Duration::from_millis(200));
    assert_eq!(settings.control_tick_interval(), Duration::from_millis(200));
}

#[test]
fn test_zero_parallelism_is_rejected() {
    let settings = PoolSettings::new().with_max_degree_of_parallel(0);
    assert!(settings.validate().is_err());
}

#[test]
fn test_zero_queue_limit_is_rejected() {
    let settings = PoolSettings::new().with_queue_limit(Some(0));
    assert!(settings.validate().is_err());
}

#[test]
fn test_zero_attempt_budget_is_rejected() {
    assert!(PoolSettings::new().with_command_max_runs(0).validate().is_err());
    assert!(PoolSettings::new().with_browser_max_fail(0).validate().is_err());
}

#[test]
fn test_health_checks_builder_enables_interval() {
    let settings = PoolSettings::new().with_health_checks(Duration::from_secs(30));
    assert!(settings.send_health_checks);
    assert_eq!(settings.health_check_interval(), Some(Duration::from_secs(30)));
}

#[test]
fn test_from_json_fills_missing_fields_with_defaults() {
    let settings =
        PoolSettings::from_json_str(r#"{"max_degree_of_parallel": 5, "queue_limit": 40}"#)
            .unwrap();
    assert_eq!(settings.max_degree_of_parallel, 5);
    assert_eq!(settings.queue_limit, Some(40));
    assert_eq!(settings.command_max_runs, 3);
}

#[test]
fn test_from_json_validates() {
    let err = PoolSettings::from_json_str(r#"{"command_max_runs": 0}"#).unwrap_err();
    assert!(err.contains("command_max_runs"));
}

#[test]
fn test_from_lookup_reports_bad_values() {
    let err = PoolSettings::from_lookup(|key| {
        (key == "BROWSER_POOL_MAX_IDLE_TIME_MS").then(|| "soon".to_string())
    })
    .unwrap_err();
    assert!(err.contains("BROWSER_POOL_MAX_IDLE_TIME_MS"));
}

#[test]
fn test_from_lookup_empty_queue_limit_means_unbounded() {
    let settings = PoolSettings::from_lookup(|key| {
        (key == "BROWSER_POOL_QUEUE_LIMIT").then(String::new)
    })
    .unwrap();
    assert_eq!(settings.queue_limit, None);
}
