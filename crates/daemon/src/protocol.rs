// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Line protocol between the host application and the daemon.
//!
//! The host writes one JSON [`ControlEnvelope`] per line on stdin. The daemon
//! writes one JSON [`DaemonEvent`] per line on stdout: replies to commands,
//! user-facing notifications, and media-control instructions for the host's
//! media library.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use lifeline_core::{
    ConnectionStats, Destination, DeviceConfig, Error as CoreError, Method, Notification,
};

/// A command plus an optional correlation id echoed on the reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub command: ControlCommand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlCommand {
    /// A wake event from the platform push service. `payload` may be the raw
    /// JSON string or an already-decoded object.
    Push { payload: Value },
    ConnectivityRestored,
    Sync,
    Fetch(FetchCommand),
    ListQueue,
    CancelAction { action_id: u64 },
    PurgeCache,
    StartCall { call_id: String, peer: String },
    SetLocalDescription { call_id: String, sdp: String },
    AddLocalCandidate { call_id: String, candidate: String },
    ChangeDevice {
        call_id: String,
        #[serde(default)]
        device: DeviceConfig,
        sdp: String,
    },
    Stats { call_id: String, stats: ConnectionStats },
    Hangup { call_id: String },
    Reject { call_id: String },
    Fail { call_id: String, reason: String },
    Snapshot { call_id: String },
    ListCalls,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchCommand {
    #[serde(default = "default_method")]
    pub method: Method,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Binary body, standard base64. Mutually exclusive with `body`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_base64: Option<String>,
    #[serde(default)]
    pub destination: Destination,
}

impl FetchCommand {
    /// The request body as bytes, from whichever body field is set.
    pub fn body_bytes(&self) -> lifeline_core::Result<Option<Vec<u8>>> {
        match (&self.body, &self.body_base64) {
            (Some(_), Some(_)) => Err(CoreError::InvalidInput(
                "fetch takes body or body_base64, not both".to_string(),
            )),
            (Some(text), None) => Ok(Some(text.clone().into_bytes())),
            (None, Some(encoded)) => STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|e| CoreError::InvalidInput(format!("body_base64: {e}"))),
            (None, None) => Ok(None),
        }
    }
}

/// Puts a response body into a reply object: `body` when it is valid UTF-8,
/// `body_base64` otherwise. Either way the host gets the exact bytes back.
pub fn insert_body(reply: &mut Map<String, Value>, body: &[u8]) {
    match std::str::from_utf8(body) {
        Ok(text) => reply.insert("body".to_string(), Value::String(text.to_string())),
        Err(_) => reply.insert("body_base64".to_string(), Value::String(STANDARD.encode(body))),
    };
}

fn default_method() -> Method {
    Method::Get
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DaemonEvent {
    Ready {
        version: String,
    },
    Reply {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ReplyError>,
    },
    Notification {
        notification: Notification,
    },
    Media(MediaAction),
}

impl DaemonEvent {
    pub fn success(id: Option<u64>, result: Value) -> Self {
        DaemonEvent::Reply {
            id,
            ok: true,
            result: (!result.is_null()).then_some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<u64>, kind: &str, message: impl Into<String>) -> Self {
        DaemonEvent::Reply {
            id,
            ok: false,
            result: None,
            error: Some(ReplyError {
                kind: kind.to_string(),
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyError {
    pub kind: String,
    pub message: String,
}

/// Instructions for the host's media library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MediaAction {
    ApplyRemoteDescription { call_id: String, sdp: String },
    AddRemoteCandidate { call_id: String, candidate: String },
    Release { call_id: String },
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
