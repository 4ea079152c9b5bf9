//! Tests for logging configuration and format parsing
//!
//! Exercises the pure functions in the logging module that turn
//! environment variables into log settings.

use mqtt_ws_bridge::observability::logging::{parse_level, LogFormat, LogSettings};
use std::collections::HashMap;
use tracing::Level;

fn settings_from(vars: &[(&str, &str)]) -> LogSettings {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    LogSettings::from_lookup(|name| map.get(name).cloned())
}

#[test]
fn test_log_format_parse_is_case_insensitive() {
    assert!(matches!(LogFormat::parse("JSON"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("Pretty"), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse("COMPACT"), LogFormat::Compact));
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    assert!(matches!(LogFormat::parse("invalid"), LogFormat::Json));
    assert!(matches!(LogFormat::parse(""), LogFormat::Json));
    assert!(matches!(LogFormat::parse("xml"), LogFormat::Json));
}

#[test]
fn test_log_level_parsing() {
    assert_eq!(parse_level("error"), Level::ERROR);
    assert_eq!(parse_level("WARN"), Level::WARN);
    assert_eq!(parse_level("debug"), Level::DEBUG);
    assert_eq!(parse_level("trace"), Level::TRACE);
    assert_eq!(parse_level("nonsense"), Level::INFO);
}

#[test]
fn test_settings_default_without_environment() {
    let settings = settings_from(&[]);

    assert_eq!(settings.level, Level::INFO);
    assert!(matches!(settings.format, LogFormat::Json));
}

#[test]
fn test_settings_follow_environment() {
    let settings = settings_from(&[("LOG_LEVEL", "debug"), ("LOG_FORMAT", "pretty")]);

    assert_eq!(settings.level, Level::DEBUG);
    assert!(matches!(settings.format, LogFormat::Pretty));
}
