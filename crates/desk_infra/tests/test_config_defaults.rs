//! Integration tests for the desk configuration defaults table.

use std::time::Duration;

use desk_infra::config::{
    BACKOFF_BASE_MS_DEFAULT, BASE_URL_DEFAULT, CLOCK_RESYNC_INTERVAL_S_DEFAULT, ConfigError,
    DeskConfigInput, JOURNAL_MAX_FILES_DEFAULT, MAX_ATTEMPTS_DEFAULT,
    RATE_LIMIT_PER_MINUTE_DEFAULT, RECV_WINDOW_MS_DEFAULT, apply_defaults,
};
use rust_decimal_macros::dec;

fn with_credentials() -> DeskConfigInput {
    DeskConfigInput {
        api_key: Some("key-123".to_string()),
        api_secret: Some("secret-456".to_string()),
        ..DeskConfigInput::default()
    }
}

/// GIVEN only credentials are provided
/// WHEN defaults are applied
/// THEN every other value comes from the defaults table.
#[test]
fn test_defaults_applied_when_only_credentials_given() {
    let config = apply_defaults(with_credentials()).expect("defaults should apply");

    assert_eq!(config.base_url, BASE_URL_DEFAULT);
    assert_eq!(config.max_order_notional, dec!(10000));
    assert_eq!(config.rate_limit_per_minute, RATE_LIMIT_PER_MINUTE_DEFAULT);
    assert_eq!(config.recv_window_ms, RECV_WINDOW_MS_DEFAULT);
    assert_eq!(config.max_attempts, MAX_ATTEMPTS_DEFAULT);
    assert_eq!(config.backoff_base_ms, BACKOFF_BASE_MS_DEFAULT);
    assert_eq!(config.clock_resync_interval_s, CLOCK_RESYNC_INTERVAL_S_DEFAULT);
    assert_eq!(config.journal_max_files, JOURNAL_MAX_FILES_DEFAULT);
}

/// GIVEN api_secret is missing
/// WHEN defaults are applied
/// THEN configuration fails closed naming the key.
#[test]
fn test_missing_secret_fails_closed() {
    let input = DeskConfigInput {
        api_secret: None,
        ..with_credentials()
    };

    let err = apply_defaults(input).expect_err("missing secret must fail");

    assert_eq!(err, ConfigError::MissingRequired { key: "api_secret" });
}

#[test]
fn test_blank_api_key_counts_as_missing() {
    let input = DeskConfigInput {
        api_key: Some("   ".to_string()),
        ..with_credentials()
    };

    assert_eq!(
        apply_defaults(input),
        Err(ConfigError::MissingRequired { key: "api_key" })
    );
}

#[test]
fn test_zero_attempts_rejected() {
    let input = DeskConfigInput {
        max_attempts: Some(0),
        ..with_credentials()
    };

    assert!(matches!(
        apply_defaults(input),
        Err(ConfigError::Invalid { key: "max_attempts", .. })
    ));
}

/// GIVEN overrides for retry and clock settings
/// WHEN the core settings are projected
/// THEN the gateway, retry and engine settings carry the overrides.
#[test]
fn test_projections_carry_overrides() {
    let input = DeskConfigInput {
        base_url: Some("https://fapi.example.test/".to_string()),
        max_order_notional: Some(dec!(2500)),
        max_attempts: Some(3),
        backoff_base_ms: Some(50),
        clock_resync_interval_s: Some(60),
        grid_poll_interval_ms: Some(500),
        ..with_credentials()
    };
    let config = apply_defaults(input).expect("valid config");

    assert_eq!(config.base_url, "https://fapi.example.test");

    let gateway = config.gateway_settings();
    assert_eq!(gateway.retry.max_attempts, 3);
    assert_eq!(gateway.retry.base_delay, Duration::from_millis(50));
    assert_eq!(gateway.clock_resync_interval, Duration::from_secs(60));
    assert_eq!(config.engine_limits().max_order_notional, dec!(2500));
    assert_eq!(
        config.strategy_settings().grid_poll_interval,
        Duration::from_millis(500)
    );
}

#[test]
fn test_credentials_debug_is_redacted() {
    let config = apply_defaults(with_credentials()).expect("valid config");

    let rendered = format!("{config:?}");

    assert!(!rendered.contains("key-123"));
    assert!(!rendered.contains("secret-456"));
    assert!(rendered.contains("<redacted>"));
}
