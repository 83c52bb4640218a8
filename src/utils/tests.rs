use serial_test::serial;
use tracing::Level;

use super::error::{BusError, RelayError};
use super::logging::{self, LOG_LEVEL_VAR, effective_level, parse_level};

#[test]
fn test_parse_level_names() {
    assert_eq!(parse_level("debug"), Level::DEBUG);
    assert_eq!(parse_level(" WARN "), Level::WARN);
    assert_eq!(parse_level("warning"), Level::WARN);
    assert_eq!(parse_level("trace"), Level::TRACE);
    assert_eq!(parse_level("nonsense"), Level::INFO);
}

#[test]
#[serial]
fn test_env_level_overrides_default() {
    temp_env::with_var(LOG_LEVEL_VAR, Some("error"), || {
        assert_eq!(effective_level("debug"), Level::ERROR);
    });
    temp_env::with_var(LOG_LEVEL_VAR, Some(""), || {
        assert_eq!(effective_level("debug"), Level::DEBUG);
    });
    temp_env::with_var_unset(LOG_LEVEL_VAR, || {
        assert_eq!(effective_level("warn"), Level::WARN);
    });
}

#[test]
#[serial]
fn test_logging_init_accepts_levels() {
    // Should not panic when called repeatedly
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
    logging::init("nonsense");
}

#[test]
fn test_bus_error_wraps_into_relay_error() {
    let err: RelayError = BusError::NotFound("queue 'orders'".to_string()).into();
    assert!(matches!(err, RelayError::Bus(BusError::NotFound(_))));
    assert_eq!(err.to_string(), "not found: queue 'orders'");
}

#[test]
fn test_invalid_host_spec_message() {
    let err = RelayError::InvalidHostSpec("guest@host:abc".to_string());
    assert_eq!(err.to_string(), "invalid host spec 'guest@host:abc'");
}
