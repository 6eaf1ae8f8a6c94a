// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! lifeline-core: Offline-resilient delivery and call signaling.
//!
//! This crate keeps a messaging client usable across unreliable networks and
//! coordinates peer-to-peer call setup. It provides:
//!
//! - [`CacheTierManager`]: four-tier response cache with per-tier freshness
//! - [`OfflineQueue`]: durable, ordered queue of failed mutating requests
//! - [`SyncOrchestrator`]: exactly-once replay of the queue with backoff
//! - [`CallManager`]: per-call signaling state machine
//! - [`QualityMonitor`]: debounced degraded/recovered detection
//! - [`PushDispatcher`]: routing of out-of-band wake events
//!
//! All I/O is behind traits ([`Network`], [`Store`], [`SignalingTransport`],
//! [`MediaResources`], [`StatsSource`], [`Notifier`]) so hosts can plug in real
//! implementations and tests can inject mocks.

pub mod backoff;
pub mod cache;
pub mod clock;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod push;
pub mod quality;
pub mod queue;
pub mod request;
pub mod signaling;
pub mod store;
pub mod sync;

#[cfg(test)]
mod test_helpers;


pub use backoff::Backoff;
pub use cache::{CacheConfig, CacheEntry, CacheTierManager, Tier};
pub use clock::{ClockSource, SystemClock};
pub use error::{Error, Result};
pub use notify::{ChannelNotifier, Notification, Notifier};
pub use pipeline::{FetchOutcome, RequestPipeline};
pub use push::{PushDispatcher, PushOutcome, PushPayload};
pub use quality::{ConnectionStats, QualityEvent, QualityMonitor, QualityThresholds, StatsSource};
pub use queue::{ActionId, OfflineQueue, QueuedAction};
pub use request::{Destination, Method, Network, Request, Response};
pub use signaling::{
    CallId, CallManager, CallRole, CallSnapshot, CallState, DeviceConfig, EndReason,
    MediaResources, SignalMessage, SignalingConfig, SignalingTransport,
};
pub use store::{open_store, MemoryStore, SqliteStore, Store, StoreOp};
pub use sync::{SyncConfig, SyncOrchestrator, SyncReport, SyncRun};
