// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration.
//!
//! Read from `config.toml` in the state directory (or the path given with
//! `--config`). Every field has a default, so a missing file or an empty
//! table is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

use lifeline_core::{CacheConfig, SignalingConfig, SyncConfig};

use crate::error::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Origin that relative request paths are resolved against.
    pub upstream_base_url: String,
    /// WebSocket relay carrying signaling messages.
    pub relay_url: String,
    /// Identity announced to the relay and used as `from` on invites.
    pub peer_id: String,
    pub http_timeout_secs: u64,
    pub http_connect_timeout_secs: u64,
    /// Ceiling for relay reconnect backoff.
    pub relay_reconnect_max_secs: u64,
    /// How often expired dynamic cache entries are purged.
    pub purge_interval_secs: u64,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub signaling: SignalingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            upstream_base_url: "http://localhost:8080".to_string(),
            relay_url: "ws://localhost:7890".to_string(),
            peer_id: "local".to_string(),
            http_timeout_secs: 30,
            http_connect_timeout_secs: 10,
            relay_reconnect_max_secs: 30,
            purge_interval_secs: 3600,
            cache: CacheConfig::default(),
            sync: SyncConfig::default(),
            signaling: SignalingConfig::default(),
        }
    }
}

impl Config {
    /// Loads the config at `path`, or defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let config = match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|source| Error::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                Config::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let base = self.base_url()?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "upstream_base_url must be http or https, got {}",
                self.upstream_base_url
            )));
        }
        let relay = Url::parse(&self.relay_url)
            .map_err(|e| Error::Config(format!("relay_url: {e}")))?;
        if !matches!(relay.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "relay_url must be ws or wss, got {}",
                self.relay_url
            )));
        }
        if self.peer_id.trim().is_empty() {
            return Err(Error::Config("peer_id must not be empty".to_string()));
        }
        if self.cache.version.trim().is_empty() {
            return Err(Error::Config("cache.version must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.upstream_base_url)
            .map_err(|e| Error::Config(format!("upstream_base_url: {e}")))
    }

    /// Resolves a path such as `/api/messages` against the upstream origin.
    /// Absolute URLs pass through unchanged.
    pub fn resolve_url(&self, url: &str) -> Result<String> {
        if Url::parse(url).is_ok() {
            return Ok(url.to_string());
        }
        let joined = self
            .base_url()?
            .join(url)
            .map_err(|e| Error::Config(format!("cannot resolve {url}: {e}")))?;
        Ok(joined.to_string())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn http_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.http_connect_timeout_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
