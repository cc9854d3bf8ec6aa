// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Lookup order: `./nearby.toml` > `~/.config/nearby/nearby.toml` >
//! `/etc/nearby/nearby.toml`, with `NEARBY_` environment overrides on top.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::NearbyConfig;

/// Config sections, used to map `NEARBY_SECTION_KEY` onto `section.key`.
const SECTIONS: &[&str] = &[
    "service", "storage", "routing", "search", "cache", "quota", "queue", "auto", "trigger",
];

/// Config file locations, lowest precedence first.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/nearby/nearby.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("nearby/nearby.toml"));
    }
    paths.push(PathBuf::from("nearby.toml"));
    paths
}

/// Build the Figment for the standard hierarchy.
pub fn build_figment() -> Figment {
    let mut figment = Figment::new().merge(Serialized::defaults(NearbyConfig::default()));
    for path in config_paths() {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(env_provider())
}

/// Load configuration from the standard hierarchy with env var overrides.
pub fn load_config() -> Result<NearbyConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no files, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<NearbyConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(NearbyConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<NearbyConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(NearbyConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Environment provider mapping `NEARBY_ROUTING_API_KEY` to `routing.api_key`.
///
/// Only the first underscore after a known section name becomes a dot, so
/// keys containing underscores survive intact.
fn env_provider() -> Env {
    Env::prefixed("NEARBY_").map(|key| map_env_key(key.as_str()).into())
}

fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}
