// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Offline queue for mutating requests that failed for lack of connectivity.
//!
//! Each action is written together with the id counter in one atomic batch
//! before [`OfflineQueue::enqueue`] returns, so ids keep increasing across
//! restarts and a crash right after enqueue cannot lose the action. Keys are
//! zero-padded ids, so an ordered scan yields replay order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::ClockSource;
use crate::error::{Error, Result};
use crate::request::{Method, Request};
use crate::store::{Store, StoreOp};

const ACTIONS_NS: &str = "queue/actions";
const META_NS: &str = "queue/meta";
const NEXT_ID_KEY: &str = "next_id";

/// Monotonic queue identifier. Defines replay order.
pub type ActionId = u64;

/// A mutating request waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: ActionId,
    pub url: String,
    pub method: Method,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
    pub enqueued_at: DateTime<Utc>,
    /// Number of replay attempts made so far.
    pub attempts: u32,
}

impl QueuedAction {
    /// The original request, verbatim.
    pub fn to_request(&self) -> Request {
        Request {
            method: self.method,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            destination: Default::default(),
        }
    }
}

fn action_key(id: ActionId) -> String {
    format!("{id:020}")
}

/// Durable, ordered queue of failed mutating requests.
pub struct OfflineQueue {
    store: Arc<dyn Store>,
    clock: Arc<dyn ClockSource>,
    /// Serializes id allocation and every mutation.
    write_lock: Mutex<()>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn ClockSource>) -> Self {
        OfflineQueue {
            store,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    fn writer(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist a request and return its id.
    ///
    /// Only mutating requests are accepted.
    pub fn enqueue(&self, request: &Request) -> Result<ActionId> {
        if !request.method.is_mutating() {
            return Err(Error::InvalidInput(format!(
                "only mutating requests can be queued, got {}",
                request.method
            )));
        }

        let _writer = self.writer();
        let id = self.next_id()?;
        let action = QueuedAction {
            id,
            url: request.url.clone(),
            method: request.method,
            headers: request.headers.clone(),
            body: request.body.clone(),
            enqueued_at: self.clock.now_utc(),
            attempts: 0,
        };

        self.store.apply(vec![
            StoreOp::put(ACTIONS_NS, action_key(id), serde_json::to_vec(&action)?),
            StoreOp::put(META_NS, NEXT_ID_KEY, (id + 1).to_string().into_bytes()),
        ])?;

        tracing::debug!(id, method = %action.method, url = %action.url, "queued offline action");
        Ok(id)
    }

    /// Next id to allocate. Never lower than one past the highest stored id,
    /// even if the counter record is missing.
    fn next_id(&self) -> Result<ActionId> {
        let counter = match self.store.get(META_NS, NEXT_ID_KEY)? {
            Some(raw) => {
                let text = String::from_utf8_lossy(&raw);
                text.trim().parse::<ActionId>().map_err(|_| {
                    Error::StorageCorrupt(format!("invalid queue counter {text:?}"))
                })?
            }
            None => 1,
        };
        let highest = self
            .store
            .scan_ordered(ACTIONS_NS)?
            .last()
            .and_then(|(key, _)| key.parse::<ActionId>().ok())
            .unwrap_or(0);
        Ok(counter.max(highest + 1))
    }

    /// All queued actions in replay order.
    ///
    /// Unreadable rows are logged and skipped.
    pub fn list(&self) -> Result<Vec<QueuedAction>> {
        let rows = self.store.scan_ordered(ACTIONS_NS)?;
        let mut actions = Vec::with_capacity(rows.len());
        for (key, raw) in rows {
            match serde_json::from_slice::<QueuedAction>(&raw) {
                Ok(action) => actions.push(action),
                Err(e) => {
                    tracing::error!(%key, error = %e, "skipping unreadable queued action");
                }
            }
        }
        Ok(actions)
    }

    /// First action in replay order.
    pub fn head(&self) -> Result<Option<QueuedAction>> {
        Ok(self.list()?.into_iter().next())
    }

    pub fn get(&self, id: ActionId) -> Result<Option<QueuedAction>> {
        match self.store.get(ACTIONS_NS, &action_key(id))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Remove an action. Returns false if it was not queued.
    pub fn remove(&self, id: ActionId) -> Result<bool> {
        let _writer = self.writer();
        let key = action_key(id);
        if self.store.get(ACTIONS_NS, &key)?.is_none() {
            return Ok(false);
        }
        self.store.delete(ACTIONS_NS, &key)?;
        Ok(true)
    }

    /// Explicit user cancellation of a pending action.
    pub fn cancel(&self, id: ActionId) -> Result<()> {
        if self.remove(id)? {
            tracing::info!(id, "cancelled queued action");
            Ok(())
        } else {
            Err(Error::ActionNotFound(id))
        }
    }

    /// Durably increment the attempt counter before a replay.
    pub fn record_attempt(&self, id: ActionId) -> Result<QueuedAction> {
        let _writer = self.writer();
        let mut action = self.get(id)?.ok_or(Error::ActionNotFound(id))?;
        action.attempts += 1;
        self.store
            .put(ACTIONS_NS, &action_key(id), serde_json::to_vec(&action)?)?;
        Ok(action)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.store.scan_ordered(ACTIONS_NS)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
