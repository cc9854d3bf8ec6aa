// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a mistyped key fails
//! at startup instead of silently falling back to a default.

use std::time::Duration;

use nearby_core::{ApiCategory, Provider, RelationType};
use serde::{Deserialize, Serialize};

/// Top-level configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NearbyConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Routing provider selection and HTTP settings.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Candidate search radii and limits.
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Rate limits and daily budgets for routing calls.
    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    /// Self-rescheduling processor loop.
    #[serde(default)]
    pub auto: AutoConfig,

    /// Authenticated HTTP trigger surface.
    #[serde(default)]
    pub trigger: TriggerConfig,
}

impl NearbyConfig {
    /// The provider actually used: `Routing` only when a key is configured.
    pub fn effective_provider(&self) -> Provider {
        match (self.routing.provider, self.routing.api_key.as_deref()) {
            (Provider::Routing, Some(key)) if !key.trim().is_empty() => Provider::Routing,
            _ => Provider::Basic,
        }
    }
}

/// Service identity and logging.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "nearby".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("nearby").join("nearby.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("nearby.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Routing provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    /// `routing` calls the API; `basic` uses straight-line estimates.
    #[serde(default = "default_provider")]
    pub provider: Provider,

    /// API key. Without one the engine runs in basic mode.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Routing profile, e.g. `foot-walking`.
    #[serde(default = "default_profile")]
    pub profile: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Isochrone ranges in seconds, ascending.
    #[serde(default = "default_isochrone_ranges")]
    pub isochrone_ranges_s: Vec<u32>,

    /// Pause between matrix chunks.
    #[serde(default = "default_chunk_throttle_ms")]
    pub chunk_throttle_ms: u64,

    /// Walking speed used by basic mode.
    #[serde(default = "default_walking_speed_kmh")]
    pub walking_speed_kmh: f64,
}

impl RoutingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn chunk_throttle(&self) -> Duration {
        Duration::from_millis(self.chunk_throttle_ms)
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            base_url: default_base_url(),
            profile: default_profile(),
            request_timeout_secs: default_request_timeout_secs(),
            isochrone_ranges_s: default_isochrone_ranges(),
            chunk_throttle_ms: default_chunk_throttle_ms(),
            walking_speed_kmh: default_walking_speed_kmh(),
        }
    }
}

fn default_provider() -> Provider {
    Provider::Routing
}

fn default_base_url() -> String {
    "https://api.openrouteservice.org/v2".to_string()
}

fn default_profile() -> String {
    "foot-walking".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_isochrone_ranges() -> Vec<u32> {
    vec![300, 600, 900]
}

fn default_chunk_throttle_ms() -> u64 {
    150
}

fn default_walking_speed_kmh() -> f64 {
    5.0
}

/// Candidate search configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    /// Radius for points of interest around an origin.
    #[serde(default = "default_radius_km")]
    pub poi_radius_km: f64,

    /// Radius for charging locations around an origin.
    #[serde(default = "default_radius_km")]
    pub charging_radius_km: f64,

    /// Upper bound on candidates sent to the routing API per origin.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Radius within which a changed entity triggers neighbour recomputes.
    #[serde(default = "default_radius_km")]
    pub affected_radius_km: f64,
}

impl SearchConfig {
    /// Search radius for a relation type.
    pub fn radius_km(&self, relation: RelationType) -> f64 {
        match relation {
            RelationType::PoiFoot => self.poi_radius_km,
            RelationType::ChargingFoot => self.charging_radius_km,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            poi_radius_km: default_radius_km(),
            charging_radius_km: default_radius_km(),
            max_candidates: default_max_candidates(),
            affected_radius_km: default_radius_km(),
        }
    }
}

fn default_radius_km() -> f64 {
    5.0
}

fn default_max_candidates() -> usize {
    50
}

/// Cache freshness configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,

    #[serde(default = "default_ttl_days")]
    pub isochrone_ttl_days: u32,

    /// Retry-after written into payloads when the key is rejected.
    #[serde(default = "default_unauthorized_retry_after_secs")]
    pub unauthorized_retry_after_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.ttl_days))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_ttl_days(),
            isochrone_ttl_days: default_ttl_days(),
            unauthorized_retry_after_secs: default_unauthorized_retry_after_secs(),
        }
    }
}

fn default_ttl_days() -> u32 {
    30
}

fn default_unauthorized_retry_after_secs() -> u64 {
    86_400
}

/// Routing quota configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaConfig {
    /// Preferred matrix chunk size and per-batch item count.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Absolute ceiling on chunk size.
    #[serde(default = "default_hard_cap")]
    pub hard_cap: usize,

    #[serde(default = "default_matrix_per_minute")]
    pub matrix_per_minute: u32,

    #[serde(default = "default_isochrones_per_minute")]
    pub isochrones_per_minute: u32,

    #[serde(default = "default_daily")]
    pub matrix_daily: u32,

    #[serde(default = "default_daily")]
    pub isochrones_daily: u32,

    /// Optional monthly ceilings; `None` means unlimited.
    #[serde(default)]
    pub matrix_monthly: Option<u32>,

    #[serde(default)]
    pub isochrones_monthly: Option<u32>,

    /// Whether matrix and isochrone calls draw from one daily budget.
    #[serde(default = "default_shared_daily_budget")]
    pub shared_daily_budget: bool,

    /// Calls held back from the daily cap as a safety margin.
    #[serde(default = "default_daily_buffer")]
    pub daily_buffer: u32,

    /// How long a header-reported remaining count stays trusted.
    #[serde(default = "default_remaining_ttl_secs")]
    pub remaining_ttl_secs: u64,

    /// How long a header-reported reset time stays trusted.
    #[serde(default = "default_reset_ttl_secs")]
    pub reset_ttl_secs: u64,
}

impl QuotaConfig {
    /// Per-minute capacity of a category's token bucket.
    pub fn per_minute(&self, category: ApiCategory) -> u32 {
        match category {
            ApiCategory::Matrix => self.matrix_per_minute,
            ApiCategory::Isochrones => self.isochrones_per_minute,
        }
    }

    pub fn daily(&self, category: ApiCategory) -> u32 {
        match category {
            ApiCategory::Matrix => self.matrix_daily,
            ApiCategory::Isochrones => self.isochrones_daily,
        }
    }

    pub fn monthly(&self, category: ApiCategory) -> Option<u32> {
        match category {
            ApiCategory::Matrix => self.matrix_monthly,
            ApiCategory::Isochrones => self.isochrones_monthly,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            hard_cap: default_hard_cap(),
            matrix_per_minute: default_matrix_per_minute(),
            isochrones_per_minute: default_isochrones_per_minute(),
            matrix_daily: default_daily(),
            isochrones_daily: default_daily(),
            matrix_monthly: None,
            isochrones_monthly: None,
            shared_daily_budget: default_shared_daily_budget(),
            daily_buffer: default_daily_buffer(),
            remaining_ttl_secs: default_remaining_ttl_secs(),
            reset_ttl_secs: default_reset_ttl_secs(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_hard_cap() -> usize {
    50
}

fn default_matrix_per_minute() -> u32 {
    40
}

fn default_isochrones_per_minute() -> u32 {
    20
}

fn default_daily() -> u32 {
    500
}

fn default_shared_daily_budget() -> bool {
    true
}

fn default_daily_buffer() -> u32 {
    10
}

fn default_remaining_ttl_secs() -> u64 {
    15 * 60
}

fn default_reset_ttl_secs() -> u64 {
    60 * 60
}

/// Work queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    #[serde(default = "default_priority")]
    pub default_priority: i32,

    /// Priority given to neighbours enqueued by a ripple.
    #[serde(default = "default_ripple_priority")]
    pub ripple_priority: i32,

    /// Processing items older than this are swept back to pending.
    #[serde(default = "default_processing_timeout_secs")]
    pub processing_timeout_secs: u64,

    /// Completed and failed rows older than this are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Expiry of the per-origin single-flight lock.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            default_priority: default_priority(),
            ripple_priority: default_ripple_priority(),
            processing_timeout_secs: default_processing_timeout_secs(),
            retention_days: default_retention_days(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

fn default_max_attempts() -> i32 {
    3
}

fn default_priority() -> i32 {
    5
}

fn default_ripple_priority() -> i32 {
    10
}

fn default_processing_timeout_secs() -> u64 {
    600
}

fn default_retention_days() -> u32 {
    30
}

fn default_lock_ttl_secs() -> u64 {
    300
}

/// Auto processor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AutoConfig {
    #[serde(default = "default_auto_enabled")]
    pub enabled: bool,

    /// Batch iterations per invocation before yielding.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_items_per_batch")]
    pub items_per_batch: usize,

    /// Fallback poll interval when nothing re-triggers the loop.
    #[serde(default = "default_idle_poll_secs")]
    pub idle_poll_secs: u64,

    /// Expiry of the "auto processor running" marker.
    #[serde(default = "default_watchdog_ttl_secs")]
    pub watchdog_ttl_secs: u64,
}

impl Default for AutoConfig {
    fn default() -> Self {
        Self {
            enabled: default_auto_enabled(),
            max_iterations: default_max_iterations(),
            items_per_batch: default_items_per_batch(),
            idle_poll_secs: default_idle_poll_secs(),
            watchdog_ttl_secs: default_watchdog_ttl_secs(),
        }
    }
}

fn default_auto_enabled() -> bool {
    true
}

fn default_max_iterations() -> u32 {
    5
}

fn default_items_per_batch() -> usize {
    5
}

fn default_idle_poll_secs() -> u64 {
    300
}

fn default_watchdog_ttl_secs() -> u64 {
    120
}

/// HTTP trigger surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_trigger_host")]
    pub host: String,

    #[serde(default = "default_trigger_port")]
    pub port: u16,

    /// Bearer token. Without one every request is rejected.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_trigger_host(),
            port: default_trigger_port(),
            token: None,
        }
    }
}

fn default_trigger_host() -> String {
    "127.0.0.1".to_string()
}

fn default_trigger_port() -> u16 {
    8787
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_run_in_basic_mode_without_key() {
        let config = NearbyConfig::default();
        assert_eq!(config.routing.provider, Provider::Routing);
        assert_eq!(config.effective_provider(), Provider::Basic);
    }

    #[test]
    fn key_enables_routing_mode() {
        let mut config = NearbyConfig::default();
        config.routing.api_key = Some("key".into());
        assert_eq!(config.effective_provider(), Provider::Routing);
        config.routing.provider = Provider::Basic;
        assert_eq!(config.effective_provider(), Provider::Basic);
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let mut config = NearbyConfig::default();
        config.routing.api_key = Some("  ".into());
        assert_eq!(config.effective_provider(), Provider::Basic);
    }

    #[test]
    fn radius_follows_relation() {
        let search = SearchConfig {
            poi_radius_km: 2.0,
            charging_radius_km: 3.0,
            ..SearchConfig::default()
        };
        assert_eq!(search.radius_km(RelationType::PoiFoot), 2.0);
        assert_eq!(search.radius_km(RelationType::ChargingFoot), 3.0);
    }

    #[test]
    fn per_category_limits() {
        let quota = QuotaConfig::default();
        assert_eq!(quota.per_minute(ApiCategory::Matrix), 40);
        assert_eq!(quota.per_minute(ApiCategory::Isochrones), 20);
        assert_eq!(quota.daily(ApiCategory::Matrix), 500);
        assert_eq!(quota.monthly(ApiCategory::Matrix), None);
    }

    #[test]
    fn cache_ttl_counts_whole_days() {
        let mut cache = CacheConfig::default();
        assert_eq!(cache.ttl(), chrono::Duration::days(30));
        cache.ttl_days = 0;
        assert!(cache.ttl().is_zero());
    }
}
