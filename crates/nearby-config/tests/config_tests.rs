// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the configuration system.

use nearby_config::diagnostic::ConfigError;
use nearby_config::{load_and_validate_str, load_config_from_str};
use nearby_core::Provider;

#[test]
fn full_toml_deserializes() {
    let toml = r#"
[service]
log_level = "debug"

[storage]
database_path = "/tmp/nearby-test.db"
wal_mode = false

[routing]
provider = "routing"
api_key = "ors-123"
profile = "foot-hiking"
isochrone_ranges_s = [120, 240]
chunk_throttle_ms = 0

[search]
poi_radius_km = 2.5
charging_radius_km = 4.0
max_candidates = 25

[cache]
ttl_days = 7

[quota]
batch_size = 20
hard_cap = 25
matrix_per_minute = 30
shared_daily_budget = false

[queue]
max_attempts = 5

[auto]
max_iterations = 2

[trigger]
enabled = true
port = 9000
token = "secret"
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.service.log_level, "debug");
    assert_eq!(config.storage.database_path, "/tmp/nearby-test.db");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.effective_provider(), Provider::Routing);
    assert_eq!(config.routing.profile, "foot-hiking");
    assert_eq!(config.routing.isochrone_ranges_s, vec![120, 240]);
    assert_eq!(config.search.poi_radius_km, 2.5);
    assert_eq!(config.search.max_candidates, 25);
    assert_eq!(config.cache.ttl_days, 7);
    assert_eq!(config.cache.isochrone_ttl_days, 30);
    assert_eq!(config.quota.batch_size, 20);
    assert!(!config.quota.shared_daily_budget);
    assert_eq!(config.queue.max_attempts, 5);
    assert_eq!(config.auto.max_iterations, 2);
    assert_eq!(config.trigger.port, 9000);
    assert_eq!(config.trigger.token.as_deref(), Some("secret"));
}

#[test]
fn empty_toml_uses_defaults() {
    let config = load_and_validate_str("").expect("defaults are valid");
    assert_eq!(config.quota.batch_size, 10);
    assert_eq!(config.quota.hard_cap, 50);
    assert_eq!(config.queue.max_attempts, 3);
    assert_eq!(config.routing.chunk_throttle_ms, 150);
    assert_eq!(config.effective_provider(), Provider::Basic);
}

#[test]
fn unknown_key_gets_suggestion() {
    let toml = r#"
[quota]
bacth_size = 3
"#;
    let errors = load_and_validate_str(toml).expect_err("unknown key must fail");
    let found = errors.iter().any(|e| {
        matches!(
            e,
            ConfigError::UnknownKey { key, suggestion: Some(s), .. }
                if key == "bacth_size" && s == "batch_size"
        )
    });
    assert!(found, "expected unknown key with suggestion, got {errors:?}");
}

#[test]
fn unknown_provider_is_invalid_value() {
    let toml = r#"
[routing]
provider = "teleport"
"#;
    let errors = load_and_validate_str(toml).expect_err("bad provider must fail");
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidValue { .. })),
        "got {errors:?}"
    );
}

#[test]
fn wrong_type_is_reported() {
    let toml = r#"
[queue]
max_attempts = "three"
"#;
    let errors = load_and_validate_str(toml).expect_err("wrong type must fail");
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidType { .. })),
        "got {errors:?}"
    );
}

#[test]
fn semantic_validation_runs_after_parse() {
    let toml = r#"
[search]
max_candidates = 0
"#;
    let errors = load_and_validate_str(toml).expect_err("zero candidates must fail");
    assert!(errors.iter().any(
        |e| matches!(e, ConfigError::Validation { message } if message.contains("max_candidates"))
    ));
}
