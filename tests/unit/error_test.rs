//! Tests for error types

use prometheus_browser_pool::core::{CommandError, FactoryError, PoolError, StateError};

#[test]
fn test_pool_error_messages() {
    assert_eq!(PoolError::AlreadyStarted.to_string(), "already started");
    assert_eq!(PoolError::NotStarted.to_string(), "not started");
    assert_eq!(
        PoolError::InvalidConfig("bad".into()).to_string(),
        "invalid configuration: bad"
    );
}

#[test]
fn test_state_error_converts_into_pool_error() {
    let err: PoolError = StateError::Backend("disk full".into()).into();
    assert!(matches!(err, PoolError::State(_)));
    assert_eq!(err.to_string(), "backend error: disk full");
}

#[test]
fn test_io_error_converts_into_state_error() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let err: StateError = io.into();
    assert!(matches!(err, StateError::Io(_)));
}

#[test]
fn test_factory_and_command_errors() {
    assert_eq!(
        FactoryError::Create("grid down".into()).to_string(),
        "failed to create browser session: grid down"
    );
    assert_eq!(CommandError::Cancelled.to_string(), "command cancelled");
}

#[test]
fn test_command_error_survives_anyhow() {
    let err: anyhow::Error = CommandError::HandleReleased.into();
    assert!(matches!(
        err.downcast_ref::<CommandError>(),
        Some(CommandError::HandleReleased)
    ));
}
