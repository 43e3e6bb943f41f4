//! Configuration loading tests
//!
//! Environment variables are process-global, so every test touching them
//! runs serially.

use evr_presenter::{Config, PresenterError, SoftwareDeviceFactory};
use evr_presenter_integration_tests::presenter_with;
use serial_test::serial;
use std::sync::Arc;
use tempfile::TempDir;

const VARS: [&str; 4] = [
    "EVR_PRESENTER_SOFTWARE_FALLBACK",
    "EVR_PRESENTER_MIGRATION_PASSES",
    "EVR_PRESENTER_CLOCKLESS",
    "EVR_PRESENTER_LOG_LEVEL",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_env_overrides_apply() {
    clear_env();
    std::env::set_var("EVR_PRESENTER_CLOCKLESS", "true");
    std::env::set_var("EVR_PRESENTER_MIGRATION_PASSES", "5");
    std::env::set_var("EVR_PRESENTER_LOG_LEVEL", "debug");

    let mut config = Config::default();
    config.apply_env_overrides().unwrap();
    clear_env();

    assert!(config.clock.clockless);
    assert_eq!(config.presenter.device_migration_passes, 5);
    assert_eq!(config.general.log_level, "debug");
    assert!(config.presenter.software_fallback_enabled);
}

#[test]
#[serial]
fn test_invalid_env_value_is_rejected() {
    clear_env();
    std::env::set_var("EVR_PRESENTER_SOFTWARE_FALLBACK", "sometimes");

    let mut config = Config::default();
    let result = config.apply_env_overrides();
    clear_env();

    assert!(matches!(result, Err(PresenterError::Config(_))));
}

#[test]
#[serial]
fn test_env_override_reaches_presenter() {
    clear_env();
    std::env::set_var("EVR_PRESENTER_MIGRATION_PASSES", "0");

    let mut config = Config::default();
    config.apply_env_overrides().unwrap();
    clear_env();

    // Zero migration passes fails validation when the presenter is built
    let result = presenter_with(config, Arc::new(SoftwareDeviceFactory));
    assert!(result.is_err());
}

#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.presenter.device_migration_passes = 4;
    config.presenter.late_sample_tolerance_ms = 15;
    config.clock.timer_slack_us = 250;
    config.save_to(&path).unwrap();

    let loaded = Config::from_file(&path).unwrap();
    assert_eq!(loaded.presenter.device_migration_passes, 4);
    assert_eq!(loaded.presenter.late_sample_tolerance_ms, 15);
    assert_eq!(loaded.clock.timer_slack_us, 250);
    loaded.validate().unwrap();
}

#[test]
fn test_partial_config_file_keeps_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[clock]\nclockless = true\n").unwrap();

    let loaded = Config::from_file(&path).unwrap();
    let defaults = Config::default();
    assert!(loaded.clock.clockless);
    assert_eq!(loaded.clock.timer_slack_us, defaults.clock.timer_slack_us);
    assert_eq!(
        loaded.presenter.device_migration_passes,
        defaults.presenter.device_migration_passes
    );
}

#[test]
fn test_malformed_config_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[presenter\nplaceholder_width = ").unwrap();

    assert!(matches!(Config::from_file(&path), Err(PresenterError::Config(_))));
    assert!(matches!(
        Config::from_file(&dir.path().join("missing.toml")),
        Err(PresenterError::Config(_))
    ));
}
