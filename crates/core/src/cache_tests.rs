// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::store::MemoryStore;
use crate::test_helpers::{MockClock, MockNetwork, RecordingNotifier};
use yare::parameterized;

const BASE: &str = "https://chat.example.com";

struct Fixture {
    cache: CacheTierManager,
    network: Arc<MockNetwork>,
    clock: Arc<MockClock>,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
}

fn fixture_with(config: CacheConfig, store: Arc<MemoryStore>) -> Fixture {
    let network = MockNetwork::new();
    let clock = MockClock::at(0);
    let notifier = RecordingNotifier::new();
    let cache = CacheTierManager::new(
        config,
        store.clone(),
        network.clone(),
        clock.clone(),
        notifier.clone(),
    );
    Fixture {
        cache,
        network,
        clock,
        store,
        notifier,
    }
}

fn fixture() -> Fixture {
    fixture_with(CacheConfig::default(), Arc::new(MemoryStore::new()))
}

fn url(path: &str) -> String {
    format!("{BASE}{path}")
}

#[parameterized(
    root = { "/", Destination::Other, Some(Tier::Static) },
    page_navigation = { "/rooms/42", Destination::Document, Some(Tier::Static) },
    bundle_js = { "/static/app.3f9a.js", Destination::Script, Some(Tier::Assets) },
    bundle_css = { "/assets/site.css", Destination::Style, Some(Tier::Assets) },
    api = { "/api/messages", Destination::Other, Some(Tier::Api) },
    static_image = { "/static/logo.png", Destination::Image, Some(Tier::Dynamic) },
    upload = { "/uploads/u1/photo.jpg", Destination::Image, Some(Tier::Dynamic) },
    unrelated = { "/healthz", Destination::Other, None },
)]
fn classify_routes(path: &str, destination: Destination, expected: Option<Tier>) {
    let config = CacheConfig::default();
    let request = Request::get(url(path)).with_destination(destination);
    assert_eq!(config.classify(&request), expected);
}

#[test]
fn mutating_requests_are_never_classified() {
    let config = CacheConfig::default();
    let request = Request::new(crate::request::Method::Post, url("/api/messages"));
    assert_eq!(config.classify(&request), None);
}

#[tokio::test]
async fn static_tier_is_cache_first() {
    let f = fixture();
    let request = Request::get(url("/static/app.js"));
    f.network.respond(&request.url, Response::ok("bundle v1"));

    let first = f.cache.fetch(&request).await.unwrap();
    assert_eq!(first.body, b"bundle v1");

    f.network.set_offline(true);
    let second = f.cache.fetch(&request).await.unwrap();
    assert_eq!(second.body, b"bundle v1");
    assert_eq!(f.network.sent().len(), 1);
}

#[tokio::test]
async fn api_entry_expired_after_ttl_still_beats_absent_on_fallback() {
    let f = fixture();
    let request = Request::get(url("/api/rooms"));
    f.network.respond(&request.url, Response::ok("rooms@0"));

    f.clock.set_secs(0);
    f.cache.fetch(&request).await.unwrap();

    f.clock.set_secs(301);
    assert!(f.cache.lookup(&request).unwrap().is_none());

    f.network.set_offline(true);
    let resp = f.cache.fetch(&request).await.unwrap();

    // Went to the network first even though an entry existed.
    assert_eq!(f.network.sent().len(), 2);
    assert_eq!(resp.body, b"rooms@0");
    assert_eq!(resp.headers.get(FALLBACK_HEADER).map(String::as_str), Some("stale"));
}

#[tokio::test]
async fn api_success_overwrites_and_resets_stored_at() {
    let f = fixture();
    let request = Request::get(url("/api/rooms"));

    f.network.respond(&request.url, Response::ok("old"));
    f.cache.fetch(&request).await.unwrap();

    f.clock.set_secs(250);
    f.network.respond(&request.url, Response::ok("new"));
    f.cache.fetch(&request).await.unwrap();

    f.clock.set_secs(400);
    let entry = f.cache.lookup(&request).unwrap().unwrap();
    assert_eq!(entry.payload, b"new");
    assert_eq!(entry.stored_at, crate::clock::from_millis(250_000));
}

#[tokio::test]
async fn api_offline_without_entry_is_network_unavailable() {
    let f = fixture();
    f.network.set_offline(true);
    let err = f.cache.fetch(&Request::get(url("/api/rooms"))).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn api_error_responses_are_not_cached() {
    let f = fixture();
    let request = Request::get(url("/api/rooms"));
    f.network.respond(&request.url, Response::new(503, "busy"));

    let resp = f.cache.fetch(&request).await.unwrap();
    assert_eq!(resp.status, 503);
    assert!(f.cache.lookup(&request).unwrap().is_none());
}

#[tokio::test]
async fn dynamic_expired_entry_is_not_served() {
    let f = fixture();
    let request = Request::get(url("/uploads/doc.pdf"));
    f.cache.fetch(&request).await.unwrap();

    f.clock.set_secs(7 * 24 * 60 * 60 + 1);
    f.network.set_offline(true);
    assert!(f.cache.fetch(&request).await.is_err());
}

#[tokio::test]
async fn dynamic_fresh_entry_is_served_offline() {
    let f = fixture();
    let request = Request::get(url("/uploads/doc.pdf"));
    f.network.respond(&request.url, Response::ok("pdf"));
    f.cache.fetch(&request).await.unwrap();

    f.clock.set_secs(60);
    f.network.set_offline(true);
    let resp = f.cache.fetch(&request).await.unwrap();
    assert_eq!(resp.body, b"pdf");
}

#[tokio::test]
async fn missing_image_gets_deterministic_placeholder() {
    let f = fixture();
    f.network.set_offline(true);
    let request = Request::get(url("/uploads/avatar.png")).with_destination(Destination::Image);

    let a = f.cache.fetch(&request).await.unwrap();
    let b = f.cache.fetch(&request).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.content_type(), Some("image/svg+xml"));
}

#[tokio::test]
async fn failed_navigation_serves_cached_offline_page() {
    let f = fixture();
    f.cache
        .precache(&[Request::get(url("/offline"))])
        .await
        .unwrap();

    f.network.set_offline(true);
    let nav = Request::get(url("/rooms/7")).with_destination(Destination::Document);
    let resp = f.cache.fetch(&nav).await.unwrap();
    assert_eq!(resp.body, url("/offline").into_bytes());
    assert_eq!(resp.headers.get(FALLBACK_HEADER).map(String::as_str), Some("offline"));
}

#[tokio::test]
async fn version_bump_drops_previous_entries() {
    let store = Arc::new(MemoryStore::new());
    let v1 = fixture_with(CacheConfig::default(), store.clone());
    assert!(v1.cache.activate().unwrap());
    let request = Request::get(url("/static/app.js"));
    v1.cache.fetch(&request).await.unwrap();
    assert!(v1.cache.lookup(&request).unwrap().is_some());

    let v2 = fixture_with(
        CacheConfig {
            version: "v2".into(),
            ..CacheConfig::default()
        },
        store.clone(),
    );
    assert!(v2.cache.activate().unwrap());
    assert!(!v2.cache.activate().unwrap());

    assert!(v2.cache.lookup(&request).unwrap().is_none());
    assert!(v2.store.scan_ordered("cache/v1/assets").unwrap().is_empty());
    assert_eq!(
        v2.notifier.all(),
        vec![Notification::CacheUpdated {
            version: "v2".into(),
            previous: Some("v1".into()),
        }]
    );
}

#[tokio::test]
async fn purge_expired_only_touches_dynamic_tier() {
    let f = fixture();
    f.cache.fetch(&Request::get(url("/uploads/a.bin"))).await.unwrap();
    f.cache.fetch(&Request::get(url("/api/rooms"))).await.unwrap();

    f.clock.set_secs(8 * 24 * 60 * 60);
    assert_eq!(f.cache.purge_expired().unwrap(), 1);
    assert_eq!(f.store.scan_ordered("cache/v1/api").unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_fetches_of_same_asset_hit_network_once() {
    let f = fixture();
    let request = Request::get(url("/static/app.js"));
    let (a, b) = tokio::join!(f.cache.fetch(&request), f.cache.fetch(&request));
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(f.network.sent().len(), 1);
}

#[tokio::test]
async fn unreadable_entry_is_treated_as_miss() {
    let f = fixture();
    let request = Request::get(url("/static/app.js"));
    f.store
        .put("cache/v1/assets", &request.cache_key().unwrap(), b"not json".to_vec())
        .unwrap();

    let resp = f.cache.fetch(&request).await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(f.network.sent().len(), 1);
}

/// Store that can be read but refuses every write.
struct ReadOnlyStore;

impl Store for ReadOnlyStore {
    fn get(&self, _ns: &str, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn scan_ordered(&self, _ns: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(Vec::new())
    }

    fn apply(&self, _ops: Vec<StoreOp>) -> Result<()> {
        Err(Error::StorageCorrupt("disk is read-only".into()))
    }
}

/// Store whose every operation fails.
struct BrokenStore;

impl Store for BrokenStore {
    fn get(&self, _ns: &str, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(Error::StorageCorrupt("unreadable".into()))
    }

    fn scan_ordered(&self, _ns: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Err(Error::StorageCorrupt("unreadable".into()))
    }

    fn apply(&self, _ops: Vec<StoreOp>) -> Result<()> {
        Err(Error::StorageCorrupt("unreadable".into()))
    }
}

fn cache_over(store: Arc<dyn Store>) -> (CacheTierManager, Arc<MockNetwork>) {
    let network = MockNetwork::new();
    let cache = CacheTierManager::new(
        CacheConfig::default(),
        store,
        network.clone(),
        MockClock::at(0),
        RecordingNotifier::new(),
    );
    (cache, network)
}

#[parameterized(
    api = { "/api/messages" },
    asset = { "/static/app.js" },
    upload = { "/uploads/u1/photo.jpg" },
)]
fn failed_cache_write_still_returns_network_response(path: &str) {
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    rt.block_on(async {
        let (cache, network) = cache_over(Arc::new(ReadOnlyStore));
        let resp = cache.fetch(&Request::get(url(path))).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, url(path).into_bytes());
        assert_eq!(network.sent().len(), 1);
    });
}

#[tokio::test]
async fn unreadable_store_falls_through_to_network() {
    let (cache, network) = cache_over(Arc::new(BrokenStore));
    let resp = cache.fetch(&Request::get(url("/static/app.js"))).await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(network.sent().len(), 1);
}
