// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-call session record.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{CallId, CallRole, CallState, DeviceConfig, EndReason};
use crate::error::{Error, Result};
use crate::quality::{QualityMonitor, QualityThresholds};

/// Mutable state for one call. Always accessed under the session lock.
#[derive(Debug)]
pub struct CallSession {
    pub(crate) call_id: CallId,
    pub(crate) peer: String,
    pub(crate) role: CallRole,
    pub(crate) state: CallState,
    pub(crate) remote_description: Option<String>,
    pub(crate) local_description: Option<String>,
    /// Local candidates in discovery order.
    pub(crate) pending_candidates: Vec<String>,
    /// Prefix of `pending_candidates` already sent to the peer.
    pub(crate) sent_candidates: usize,
    /// Remote candidates received before the remote description.
    pub(crate) buffered_remote_candidates: Vec<String>,
    pub(crate) device: DeviceConfig,
    /// Bumped whenever a negotiation timer is armed.
    pub(crate) epoch: u64,
    pub(crate) pair_confirmed: bool,
    /// A remote offer was applied and the local answer is still owed.
    pub(crate) awaiting_local_answer: bool,
    pub(crate) monitor: QualityMonitor,
    pub(crate) timer: Option<CancellationToken>,
    pub(crate) sampler: Option<CancellationToken>,
    pub(crate) end_reason: Option<EndReason>,
}

impl CallSession {
    pub(crate) fn new(
        call_id: CallId,
        peer: String,
        role: CallRole,
        thresholds: QualityThresholds,
    ) -> Self {
        CallSession {
            call_id,
            peer,
            role,
            state: CallState::Idle,
            remote_description: None,
            local_description: None,
            pending_candidates: Vec::new(),
            sent_candidates: 0,
            buffered_remote_candidates: Vec::new(),
            device: DeviceConfig::default(),
            epoch: 0,
            pair_confirmed: false,
            awaiting_local_answer: false,
            monitor: QualityMonitor::new(thresholds),
            timer: None,
            sampler: None,
            end_reason: None,
        }
    }

    /// Moves to `to`, rejecting edges the state machine does not have.
    pub(crate) fn transition(&mut self, to: CallState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        tracing::debug!(call_id = %self.call_id, from = %self.state, to = %to, "call transition");
        self.state = to;
        Ok(())
    }

    /// Whether every condition for `negotiating -> connected` holds.
    pub(crate) fn ready_to_connect(&self) -> bool {
        self.state == CallState::Negotiating
            && self.local_description.is_some()
            && self.remote_description.is_some()
            && !self.awaiting_local_answer
            && self.pair_confirmed
    }

    pub(crate) fn cancel_timer(&mut self) {
        if let Some(token) = self.timer.take() {
            token.cancel();
        }
    }

    pub(crate) fn cancel_sampler(&mut self) {
        if let Some(token) = self.sampler.take() {
            token.cancel();
        }
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            call_id: self.call_id.clone(),
            peer: self.peer.clone(),
            role: self.role,
            state: self.state,
            has_remote_description: self.remote_description.is_some(),
            has_local_description: self.local_description.is_some(),
            pending_candidates: self.pending_candidates.clone(),
            buffered_remote_candidates: self.buffered_remote_candidates.len(),
            device: self.device.clone(),
            end_reason: self.end_reason,
        }
    }
}

/// Read-only view of a call for callers outside the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub call_id: CallId,
    pub peer: String,
    pub role: CallRole,
    pub state: CallState,
    pub has_remote_description: bool,
    pub has_local_description: bool,
    pub pending_candidates: Vec<String>,
    pub buffered_remote_candidates: usize,
    pub device: DeviceConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
