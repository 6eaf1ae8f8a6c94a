// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Tiered response cache.
//!
//! Every cacheable request belongs to exactly one [`Tier`]:
//!
//! | Tier    | Routes                          | Policy                         | TTL     |
//! |---------|---------------------------------|--------------------------------|---------|
//! | static  | shell/page routes               | cache-first                    | none    |
//! | assets  | bundled JS/CSS                  | cache-first                    | none    |
//! | api     | `GET /api/*`                    | network-first, cache fallback  | 5 min   |
//! | dynamic | other asset/upload paths        | network-first, cache fallback  | 7 days  |
//!
//! Entries are stored under a namespace that includes the configured cache
//! version, so activating a new version drops every entry of the previous one
//! in a single atomic batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use crate::clock::ClockSource;
use crate::error::{Error, Result};
use crate::notify::{Notification, Notifier};
use crate::request::{Destination, Network, Request, Response};
use crate::store::{Store, StoreOp};

const META_NS: &str = "cache-meta";
const ACTIVE_VERSION_KEY: &str = "active_version";

/// Header added to responses served from cache after the network failed.
pub const FALLBACK_HEADER: &str = "x-lifeline-cache";

const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200"><rect width="200" height="200" fill="#e5e7eb"/><text x="100" y="106" font-family="sans-serif" font-size="14" text-anchor="middle" fill="#6b7280">Offline</text></svg>"##;

/// Cache partition with its own freshness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Static,
    Assets,
    Api,
    Dynamic,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Static, Tier::Assets, Tier::Api, Tier::Dynamic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Static => "static",
            Tier::Assets => "assets",
            Tier::Api => "api",
            Tier::Dynamic => "dynamic",
        }
    }

    /// Time after which an entry is stale. `None` means valid until the next
    /// version bump.
    pub fn ttl(&self, config: &CacheConfig) -> Option<Duration> {
        match self {
            Tier::Static | Tier::Assets => None,
            Tier::Api => Some(Duration::from_secs(config.api_ttl_secs)),
            Tier::Dynamic => Some(Duration::from_secs(config.dynamic_ttl_secs)),
        }
    }

    fn namespace(&self, version: &str) -> String {
        format!("cache/{version}/{}", self.as_str())
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache configuration. The version is fixed for the lifetime of a manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache version; changing it invalidates every tier on [`CacheTierManager::activate`].
    pub version: String,
    pub api_ttl_secs: u64,
    pub dynamic_ttl_secs: u64,
    /// Page routes served from the static tier.
    pub shell_routes: Vec<String>,
    /// Route served for failed page navigations with no cached copy.
    pub offline_route: Option<String>,
    pub api_prefix: String,
    pub asset_prefixes: Vec<String>,
    pub upload_prefixes: Vec<String>,
    /// File extensions that identify bundled assets under an asset prefix.
    pub bundle_extensions: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            version: "v1".to_string(),
            api_ttl_secs: 5 * 60,
            dynamic_ttl_secs: 7 * 24 * 60 * 60,
            shell_routes: vec!["/".to_string(), "/offline".to_string()],
            offline_route: Some("/offline".to_string()),
            api_prefix: "/api/".to_string(),
            asset_prefixes: vec!["/static/".to_string(), "/assets/".to_string()],
            upload_prefixes: vec!["/uploads/".to_string()],
            bundle_extensions: vec!["js".to_string(), "mjs".to_string(), "css".to_string()],
        }
    }
}

impl CacheConfig {
    /// Select the tier for a request, or `None` if it is not cacheable.
    pub fn classify(&self, request: &Request) -> Option<Tier> {
        if request.method.is_mutating() {
            return None;
        }
        let url = request.parsed_url().ok()?;
        let path = url.path();

        if path.starts_with(&self.api_prefix) {
            return Some(Tier::Api);
        }
        if request.destination == Destination::Document
            || self.shell_routes.iter().any(|r| r == path)
        {
            return Some(Tier::Static);
        }
        if self.asset_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            let is_bundle = path
                .rsplit_once('.')
                .is_some_and(|(_, ext)| self.bundle_extensions.iter().any(|e| e == ext));
            return Some(if is_bundle { Tier::Assets } else { Tier::Dynamic });
        }
        if self.upload_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return Some(Tier::Dynamic);
        }
        None
    }
}

/// A cached response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub resource_key: String,
    pub tier: Tier,
    pub stored_at: DateTime<Utc>,
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub payload: Vec<u8>,
    pub content_type: Option<String>,
}

impl CacheEntry {
    fn from_response(
        resource_key: String,
        tier: Tier,
        stored_at: DateTime<Utc>,
        resp: &Response,
    ) -> Self {
        CacheEntry {
            resource_key,
            tier,
            stored_at,
            status: resp.status,
            headers: resp.headers.clone(),
            payload: resp.body.clone(),
            content_type: resp.content_type().map(str::to_string),
        }
    }

    /// True if the entry is older than its tier TTL at `now`.
    pub fn is_expired(&self, config: &CacheConfig, now: DateTime<Utc>) -> bool {
        match self.tier.ttl(config) {
            None => false,
            Some(ttl) => {
                let age = now.signed_duration_since(self.stored_at);
                age.to_std().is_ok_and(|age| age > ttl)
            }
        }
    }

    fn to_response(&self) -> Response {
        Response {
            status: self.status,
            headers: self.headers.clone(),
            body: self.payload.clone(),
        }
    }
}

/// Per-key async locks so read-modify-write on one entry never races while
/// different keys proceed in parallel.
#[derive(Default)]
struct KeyLocks {
    inner: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            match map.get(key).and_then(Weak::upgrade) {
                Some(m) => m,
                None => {
                    map.retain(|_, weak| weak.strong_count() > 0);
                    let m = Arc::new(tokio::sync::Mutex::new(()));
                    map.insert(key.to_string(), Arc::downgrade(&m));
                    m
                }
            }
        };
        mutex.lock_owned().await
    }
}

/// Four-tier cache in front of the network.
pub struct CacheTierManager {
    config: CacheConfig,
    store: Arc<dyn Store>,
    network: Arc<dyn Network>,
    clock: Arc<dyn ClockSource>,
    notifier: Arc<dyn Notifier>,
    locks: KeyLocks,
}

impl CacheTierManager {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn Store>,
        network: Arc<dyn Network>,
        clock: Arc<dyn ClockSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        CacheTierManager {
            config,
            store,
            network,
            clock,
            notifier,
            locks: KeyLocks::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Make the configured version the active one.
    ///
    /// If a different version was active, all of its entries are dropped in
    /// one batch and `cache-updated` is raised. Returns true on rollover.
    pub fn activate(&self) -> Result<bool> {
        let previous = self
            .store
            .get(META_NS, ACTIVE_VERSION_KEY)?
            .map(|raw| String::from_utf8_lossy(&raw).into_owned());

        if previous.as_deref() == Some(self.config.version.as_str()) {
            return Ok(false);
        }

        let mut batch: Vec<StoreOp> = previous
            .iter()
            .flat_map(|old| {
                Tier::ALL
                    .into_iter()
                    .map(move |tier| StoreOp::drop_namespace(tier.namespace(old)))
            })
            .collect();
        batch.push(StoreOp::put(
            META_NS,
            ACTIVE_VERSION_KEY,
            self.config.version.as_bytes().to_vec(),
        ));
        self.store.apply(batch)?;

        tracing::info!(
            version = %self.config.version,
            previous = previous.as_deref().unwrap_or("none"),
            "activated cache version"
        );
        self.notifier.notify(Notification::CacheUpdated {
            version: self.config.version.clone(),
            previous,
        });
        Ok(true)
    }

    /// Fetch the given shell/asset requests into the cache.
    ///
    /// Fails on the first request that cannot be fetched successfully.
    pub async fn precache(&self, requests: &[Request]) -> Result<usize> {
        let mut stored = 0;
        for request in requests {
            let tier = self.config.classify(request).ok_or_else(|| {
                Error::InvalidInput(format!("'{}' is not a cacheable route", request.url))
            })?;
            let key = request.cache_key()?;
            let _guard = self.locks.lock(&key).await;
            let resp = self.network.send(request).await?;
            if !resp.is_success() {
                return Err(resp.into_rejection());
            }
            self.write(tier, key, &resp)?;
            stored += 1;
        }
        Ok(stored)
    }

    /// Fetch a non-mutating request through its tier policy.
    ///
    /// Requests that do not classify into a tier go straight to the network.
    pub async fn fetch(&self, request: &Request) -> Result<Response> {
        let Some(tier) = self.config.classify(request) else {
            return self.network.send(request).await;
        };
        let key = request.cache_key()?;
        let _guard = self.locks.lock(&key).await;

        match tier {
            Tier::Static | Tier::Assets => self.cache_first(tier, key, request).await,
            Tier::Api | Tier::Dynamic => self.network_first(tier, key, request).await,
        }
    }

    /// Fresh cached entry for a request, if any. Expired entries are a miss.
    pub fn lookup(&self, request: &Request) -> Result<Option<CacheEntry>> {
        let Some(tier) = self.config.classify(request) else {
            return Ok(None);
        };
        let now = self.clock.now_utc();
        Ok(self
            .read(tier, &request.cache_key()?)?
            .filter(|entry| !entry.is_expired(&self.config, now)))
    }

    /// Delete dynamic-tier entries past their TTL. Returns the number removed.
    ///
    /// Expired api entries are kept: they remain useful as offline fallback
    /// until overwritten or rolled over.
    pub fn purge_expired(&self) -> Result<usize> {
        let ns = Tier::Dynamic.namespace(&self.config.version);
        let now = self.clock.now_utc();
        let batch: Vec<StoreOp> = self
            .store
            .scan_ordered(&ns)?
            .into_iter()
            .filter(|(_, raw)| {
                serde_json::from_slice::<CacheEntry>(raw)
                    .map_or(true, |entry| entry.is_expired(&self.config, now))
            })
            .map(|(key, _)| StoreOp::delete(ns.clone(), key))
            .collect();
        let removed = batch.len();
        if removed > 0 {
            self.store.apply(batch)?;
            tracing::debug!(removed, "purged expired dynamic cache entries");
        }
        Ok(removed)
    }

    async fn cache_first(&self, tier: Tier, key: String, request: &Request) -> Result<Response> {
        if let Some(entry) = self.cached(tier, &key) {
            return Ok(entry.to_response());
        }
        match self.network.send(request).await {
            Ok(resp) => {
                if resp.is_success() {
                    self.write_through(tier, key, &resp);
                }
                Ok(resp)
            }
            Err(e) if e.is_transient() && request.destination == Destination::Document => {
                self.offline_page(request)?.ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn network_first(&self, tier: Tier, key: String, request: &Request) -> Result<Response> {
        let err = match self.network.send(request).await {
            Ok(resp) => {
                if resp.is_success() {
                    self.write_through(tier, key, &resp);
                }
                return Ok(resp);
            }
            Err(e) if e.is_transient() => e,
            Err(e) => return Err(e),
        };

        let now = self.clock.now_utc();
        let cached = self.cached(tier, &key);
        match (tier, cached) {
            // Expired-but-present beats absent for API reads.
            (Tier::Api, Some(entry)) => {
                let freshness = if entry.is_expired(&self.config, now) {
                    "stale"
                } else {
                    "fallback"
                };
                tracing::debug!(%key, freshness, "network unavailable, serving cached api response");
                Ok(entry.to_response().with_header(FALLBACK_HEADER, freshness))
            }
            (Tier::Dynamic, Some(entry)) if !entry.is_expired(&self.config, now) => {
                Ok(entry.to_response().with_header(FALLBACK_HEADER, "fallback"))
            }
            (Tier::Dynamic, _) if request.destination == Destination::Image => {
                Ok(placeholder_image())
            }
            _ => Err(err),
        }
    }

    fn offline_page(&self, request: &Request) -> Result<Option<Response>> {
        let Some(route) = &self.config.offline_route else {
            return Ok(None);
        };
        let url = request.parsed_url()?.join(route)?;
        let offline = Request::get(url.as_str());
        Ok(self
            .read(Tier::Static, &offline.cache_key()?)?
            .map(|entry| entry.to_response().with_header(FALLBACK_HEADER, "offline")))
    }

    fn read(&self, tier: Tier, key: &str) -> Result<Option<CacheEntry>> {
        let ns = tier.namespace(&self.config.version);
        let Some(raw) = self.store.get(&ns, key)? else {
            return Ok(None);
        };
        match serde_json::from_slice(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!(%key, tier = %tier, error = %e, "dropping unreadable cache entry");
                self.store.delete(&ns, key)?;
                Ok(None)
            }
        }
    }

    /// Cache read on the fetch path. A store failure is logged and treated
    /// as a miss so the request still gets an answer.
    fn cached(&self, tier: Tier, key: &str) -> Option<CacheEntry> {
        match self.read(tier, key) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!(%key, tier = %tier, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write-through after a successful network response. A store failure
    /// never replaces the response the caller is waiting for.
    fn write_through(&self, tier: Tier, key: String, resp: &Response) {
        if let Err(e) = self.write(tier, key, resp) {
            tracing::error!(tier = %tier, error = %e, "cache write failed, response served uncached");
        }
    }

    fn write(&self, tier: Tier, key: String, resp: &Response) -> Result<()> {
        let entry = CacheEntry::from_response(key, tier, self.clock.now_utc(), resp);
        let raw = serde_json::to_vec(&entry)?;
        self.store
            .put(&tier.namespace(&self.config.version), &entry.resource_key, raw)
    }
}

/// Deterministic image served when an image cannot be fetched or found in cache.
pub fn placeholder_image() -> Response {
    Response::ok(PLACEHOLDER_SVG)
        .with_header("content-type", "image/svg+xml")
        .with_header(FALLBACK_HEADER, "placeholder")
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
