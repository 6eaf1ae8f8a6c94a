// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! User-facing notifications.
//!
//! Notifications are fire-and-forget: a [`Notifier`] never reports failure back
//! to the component that raised the event.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::signaling::{CallRole, EndReason};
use crate::sync::SyncReport;

/// Events surfaced to the UI collaborator.
///
/// Serialized as `{"type": "<kebab-case>", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum Notification {
    /// A sync run finished.
    SyncComplete(SyncReport),

    /// A call entered the invited state (outgoing ring or incoming alert).
    CallInvited {
        call_id: String,
        peer: String,
        role: CallRole,
    },

    CallDegraded { call_id: String },

    CallRecovered { call_id: String },

    /// A call reached its terminal state. Raised exactly once per call.
    CallEnded { call_id: String, reason: EndReason },

    /// A new cache version was activated and the previous one dropped.
    CacheUpdated {
        version: String,
        previous: Option<String>,
    },
}

/// Receiver of notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that forwards into an unbounded tokio channel.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelNotifier { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::debug!("notification dropped, receiver closed");
        }
    }
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
