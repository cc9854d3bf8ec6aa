// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.

use nearby_core::Provider;
use tracing::warn;

use crate::diagnostic::ConfigError;
use crate::model::NearbyConfig;

/// Validate a deserialized configuration, collecting every problem.
pub fn validate_config(config: &NearbyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::validation(
            "storage.database_path must not be empty",
        ));
    }

    for (key, value) in [
        ("search.poi_radius_km", config.search.poi_radius_km),
        ("search.charging_radius_km", config.search.charging_radius_km),
        ("search.affected_radius_km", config.search.affected_radius_km),
        ("routing.walking_speed_kmh", config.routing.walking_speed_kmh),
    ] {
        if !(value.is_finite() && value > 0.0) {
            errors.push(ConfigError::validation(format!(
                "{key} must be a positive number, got {value}"
            )));
        }
    }

    if config.search.max_candidates == 0 {
        errors.push(ConfigError::validation("search.max_candidates must be at least 1"));
    }

    if config.quota.batch_size == 0 {
        errors.push(ConfigError::validation("quota.batch_size must be at least 1"));
    }
    if config.quota.hard_cap == 0 {
        errors.push(ConfigError::validation("quota.hard_cap must be at least 1"));
    }
    if config.quota.matrix_per_minute == 0 || config.quota.isochrones_per_minute == 0 {
        errors.push(ConfigError::validation(
            "quota per-minute limits must be at least 1",
        ));
    }

    if config.queue.max_attempts < 1 {
        errors.push(ConfigError::validation(format!(
            "queue.max_attempts must be at least 1, got {}",
            config.queue.max_attempts
        )));
    }

    if config.auto.max_iterations == 0 || config.auto.items_per_batch == 0 {
        errors.push(ConfigError::validation(
            "auto.max_iterations and auto.items_per_batch must be at least 1",
        ));
    }

    let ranges = &config.routing.isochrone_ranges_s;
    if ranges.is_empty() || ranges.contains(&0) || !ranges.windows(2).all(|w| w[0] < w[1]) {
        errors.push(ConfigError::validation(format!(
            "routing.isochrone_ranges_s must be non-empty, positive, and strictly ascending, got {ranges:?}"
        )));
    }

    if config.routing.base_url.trim().is_empty() {
        errors.push(ConfigError::validation("routing.base_url must not be empty"));
    }

    let host = config.trigger.host.trim();
    let host_ok = host.parse::<std::net::IpAddr>().is_ok()
        || (!host.is_empty()
            && host
                .chars()
                .all(|c| c.is_alphanumeric() || c == '.' || c == '-'));
    if !host_ok {
        errors.push(ConfigError::validation(format!(
            "trigger.host `{host}` is not a valid IP address or hostname"
        )));
    }

    if config.trigger.enabled && config.trigger.token.is_none() {
        warn!("trigger.enabled is set without trigger.token; every trigger request will be rejected");
    }

    if config.routing.provider == Provider::Routing && config.effective_provider() == Provider::Basic {
        warn!("routing.provider is `routing` but no routing.api_key is set; running in basic mode");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
