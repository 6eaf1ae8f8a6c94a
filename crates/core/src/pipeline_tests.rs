// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::cache::CacheConfig;
use crate::error::Error;
use crate::request::Method;
use crate::store::MemoryStore;
use crate::test_helpers::{MockClock, MockNetwork, RecordingNotifier};

fn pipeline() -> (RequestPipeline, Arc<MockNetwork>, Arc<OfflineQueue>) {
    let store = Arc::new(MemoryStore::new());
    let network = MockNetwork::new();
    let clock = MockClock::at(0);
    let cache = Arc::new(CacheTierManager::new(
        CacheConfig::default(),
        store.clone(),
        network.clone(),
        clock.clone(),
        RecordingNotifier::new(),
    ));
    let queue = Arc::new(OfflineQueue::new(store, clock));
    (
        RequestPipeline::new(cache, queue.clone(), network.clone()),
        network,
        queue,
    )
}

fn send_message() -> Request {
    Request::new(Method::Post, "https://chat.example.com/api/messages").with_body("hi")
}

#[tokio::test]
async fn mutating_success_passes_through() {
    let (pipeline, _network, queue) = pipeline();
    let outcome = pipeline.fetch(&send_message()).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Response(r) if r.status == 200));
    assert!(queue.is_empty().unwrap());
}

#[tokio::test]
async fn mutating_offline_is_queued() {
    let (pipeline, network, queue) = pipeline();
    network.set_offline(true);

    let outcome = pipeline.fetch(&send_message()).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Queued { id: 1 });
    assert_eq!(queue.list().unwrap()[0].to_request(), send_message());
}

#[tokio::test]
async fn mutating_rejection_is_surfaced_not_queued() {
    let (pipeline, network, queue) = pipeline();
    network.respond(
        "https://chat.example.com/api/messages",
        Response::new(422, "too long"),
    );

    let err = pipeline.fetch(&send_message()).await.unwrap_err();
    assert!(matches!(err, Error::ApplicationRejected { status: 422, .. }));
    assert!(queue.is_empty().unwrap());
}

#[tokio::test]
async fn reads_go_through_cache() {
    let (pipeline, network, _queue) = pipeline();
    let read = Request::get("https://chat.example.com/static/app.js");
    pipeline.fetch(&read).await.unwrap();
    network.set_offline(true);
    let outcome = pipeline.fetch(&read).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Response(_)));
}
