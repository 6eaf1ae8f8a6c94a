// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use tempfile::TempDir;
use yare::parameterized;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(CONFIG_FILE_NAME);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let config = Config::load(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.relay_url, "ws://localhost:7890");
    assert_eq!(config.cache.api_ttl_secs, 300);
}

#[test]
fn partial_file_keeps_other_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
upstream_base_url = "https://chat.example.com"
peer_id = "alice"

[cache]
version = "v7"

[signaling]
negotiation_timeout_ms = 10000

[signaling.quality]
debounce_samples = 5
"#,
    );
    let config = Config::load(&path).unwrap();
    assert_eq!(config.upstream_base_url, "https://chat.example.com");
    assert_eq!(config.peer_id, "alice");
    assert_eq!(config.cache.version, "v7");
    assert_eq!(config.cache.api_ttl_secs, 300);
    assert_eq!(config.signaling.negotiation_timeout_ms, 10_000);
    assert_eq!(config.signaling.quality.debounce_samples, 5);
    assert_eq!(config.signaling.quality.max_rtt_ms, 400);
    assert_eq!(config.sync, SyncConfig::default());
}

#[test]
fn malformed_toml_is_reported_with_path() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "relay_url = [not valid");
    let err = Config::load(&path).unwrap_err();
    assert!(matches!(err, Error::ConfigParse { .. }));
    assert!(err.to_string().contains(CONFIG_FILE_NAME));
}

#[parameterized(
    relay_http_scheme = { r#"relay_url = "http://relay.example.com""# },
    relay_garbage = { r#"relay_url = "not a url""# },
    upstream_ws_scheme = { r#"upstream_base_url = "ws://chat.example.com""# },
    empty_peer = { r#"peer_id = "  ""# },
    empty_cache_version = { "[cache]\nversion = \"\"" },
)]
fn invalid_values_are_rejected(content: &str) {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, content);
    assert!(matches!(Config::load(&path), Err(Error::Config(_))));
}

#[parameterized(
    absolute_path = { "/api/messages", "https://chat.example.com/api/messages" },
    relative_path = { "static/app.js", "https://chat.example.com/static/app.js" },
    with_query = { "/api/messages?since=4", "https://chat.example.com/api/messages?since=4" },
    absolute_url = { "https://cdn.example.com/a.png", "https://cdn.example.com/a.png" },
)]
fn resolve_url_against_upstream(input: &str, expected: &str) {
    let config = Config {
        upstream_base_url: "https://chat.example.com".into(),
        ..Config::default()
    };
    assert_eq!(config.resolve_url(input).unwrap(), expected);
}
