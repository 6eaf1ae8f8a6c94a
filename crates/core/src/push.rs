// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Out-of-band wake events.
//!
//! A push payload either announces an incoming call or hints that the server
//! has something for us. Anything else is logged and dropped; malformed input
//! never takes the dispatcher down.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::signaling::{CallId, CallManager};
use crate::sync::{SyncOrchestrator, SyncRun};

/// Recognized push payloads, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PushPayload {
    CallInvite { call_id: CallId, from: String },
    SyncHint,
}

impl PushPayload {
    /// Parses a raw payload. `None` for unknown types or malformed JSON.
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(payload) => Some(payload),
            Err(e) => {
                let kind = serde_json::from_str::<serde_json::Value>(raw)
                    .ok()
                    .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string));
                tracing::warn!(kind = kind.as_deref().unwrap_or("<none>"), error = %e, "dropping unrecognized push payload");
                None
            }
        }
    }
}

/// What a push led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// A call invite was recorded; `alerted` is false for a repeated invite.
    Invited { call_id: CallId, alerted: bool },
    Synced(SyncRun),
    Dropped,
}

/// Routes push payloads to the call manager or the sync orchestrator.
pub struct PushDispatcher {
    calls: CallManager,
    sync: Arc<SyncOrchestrator>,
}

impl PushDispatcher {
    pub fn new(calls: CallManager, sync: Arc<SyncOrchestrator>) -> Self {
        PushDispatcher { calls, sync }
    }

    /// Handles one raw push payload. Never fails: errors are logged and the
    /// payload is reported as dropped.
    pub async fn on_push(&self, raw: &str) -> PushOutcome {
        let Some(payload) = PushPayload::parse(raw) else {
            return PushOutcome::Dropped;
        };
        self.dispatch(payload).await
    }

    pub async fn dispatch(&self, payload: PushPayload) -> PushOutcome {
        match payload {
            PushPayload::CallInvite { call_id, from } => {
                match self.calls.receive_invite(call_id.clone(), from).await {
                    Ok(alerted) => PushOutcome::Invited { call_id, alerted },
                    Err(e) => {
                        tracing::warn!(%call_id, error = %e, "call invite push not applied");
                        PushOutcome::Dropped
                    }
                }
            }
            PushPayload::SyncHint => match self.sync.run_sync().await {
                Ok(run) => PushOutcome::Synced(run),
                Err(e) => {
                    tracing::error!(error = %e, "sync triggered by push failed");
                    PushOutcome::Dropped
                }
            },
        }
    }
}

#[cfg(test)]
#[path = "push_tests.rs"]
mod tests;
