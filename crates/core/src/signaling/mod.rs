// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Peer-to-peer call signaling.
//!
//! # State machine
//!
//! ```text
//!  idle ──► invited ──► negotiating ──► connected ◄──► degraded
//!                          ▲   │           │              │
//!                          │   │           └──────┬───────┘
//!                          │   │   device change  │
//!                          │   │   or remote offer│
//!                          └───┼──────────────────┘
//!                              ▼
//!        (any state) ──────► ended
//! ```
//!
//! Remote candidates that arrive before the remote description are buffered
//! and applied once it is known. Every path into `ended` goes through one
//! idempotent teardown that releases media and notifies the remote exactly
//! once.

mod manager;
mod session;

pub use manager::CallManager;
pub use session::CallSnapshot;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::backoff::Backoff;
use crate::error::Result;
use crate::quality::QualityThresholds;

/// Identifier shared by both peers of a call.
pub type CallId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallRole {
    Caller,
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    Invited,
    Negotiating,
    Connected,
    Degraded,
    Ended,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Invited => "invited",
            CallState::Negotiating => "negotiating",
            CallState::Connected => "connected",
            CallState::Degraded => "degraded",
            CallState::Ended => "ended",
        }
    }

    /// Whether the state machine has an edge from `self` to `to`.
    pub fn can_transition_to(&self, to: CallState) -> bool {
        use CallState::*;
        match (self, to) {
            (Ended, _) => false,
            (_, Ended) => true,
            (Idle, Invited)
            | (Invited, Negotiating)
            | (Negotiating, Connected)
            | (Connected, Degraded)
            | (Degraded, Connected)
            | (Connected, Negotiating)
            | (Degraded, Negotiating) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    LocalHangup,
    RemoteHangup,
    Rejected,
    RemoteRejected,
    SignalingTimeout,
    TransportFatal,
}

/// Local capture/playback devices for a call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub audio_input: Option<String>,
    pub audio_output: Option<String>,
    pub video_input: Option<String>,
    pub video_enabled: bool,
}

/// Messages carried between peers by the signaling relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    Invite { call_id: CallId, from: String },
    Offer { call_id: CallId, sdp: String },
    Answer { call_id: CallId, sdp: String },
    Candidate { call_id: CallId, candidate: String },
    Hangup { call_id: CallId },
    Reject { call_id: CallId },
}

impl SignalMessage {
    pub fn call_id(&self) -> &str {
        match self {
            SignalMessage::Invite { call_id, .. }
            | SignalMessage::Offer { call_id, .. }
            | SignalMessage::Answer { call_id, .. }
            | SignalMessage::Candidate { call_id, .. }
            | SignalMessage::Hangup { call_id }
            | SignalMessage::Reject { call_id } => call_id,
        }
    }

    /// Serializes the message to JSON.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the message from JSON.
    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Reliable, ordered, per-call message bus to the remote peer.
pub trait SignalingTransport: Send + Sync {
    fn send<'a>(
        &'a self,
        peer: &'a str,
        msg: SignalMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Local media resources owned by the media-transport library.
pub trait MediaResources: Send + Sync {
    fn apply_remote_description(&self, call_id: &str, sdp: &str) -> Result<()>;

    fn add_remote_candidate(&self, call_id: &str, candidate: &str) -> Result<()>;

    /// Release capture devices and transports for the call.
    fn release(&self, call_id: &str);
}

/// Configuration for call signaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Time allowed in `negotiating` before the call is torn down (milliseconds).
    pub negotiation_timeout_ms: u64,
    /// Stats sampling interval (milliseconds).
    pub stats_interval_ms: u64,
    /// Attempts per signaling message before the transport is declared dead.
    pub send_attempts: u32,
    pub send_retry_initial_ms: u64,
    pub send_retry_max_ms: u64,
    pub quality: QualityThresholds,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        SignalingConfig {
            negotiation_timeout_ms: 30_000,
            stats_interval_ms: 1_000,
            send_attempts: 3,
            send_retry_initial_ms: 200,
            send_retry_max_ms: 2_000,
            quality: QualityThresholds::default(),
        }
    }
}

impl SignalingConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(1))
    }

    pub fn send_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.send_retry_initial_ms),
            Duration::from_millis(self.send_retry_max_ms),
        )
    }
}
