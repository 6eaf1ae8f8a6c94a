// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Call manager: owns every [`CallSession`] and drives its state machine.
//!
//! Each session sits behind its own async mutex, so transitions for one call
//! are serialized while different calls proceed independently. Background
//! work (negotiation timers, stats samplers) holds only a weak handle to the
//! manager and a cancellation token owned by the session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::session::{CallSession, CallSnapshot};
use super::{
    CallId, CallRole, CallState, DeviceConfig, EndReason, MediaResources, SignalMessage,
    SignalingConfig, SignalingTransport,
};
use crate::error::{Error, Result};
use crate::notify::{Notification, Notifier};
use crate::quality::{ConnectionStats, QualityEvent, StatsSource};

type SharedSession = Arc<AsyncMutex<CallSession>>;

struct Inner {
    local_id: String,
    sessions: Mutex<HashMap<CallId, SharedSession>>,
    transport: Arc<dyn SignalingTransport>,
    media: Arc<dyn MediaResources>,
    stats: Arc<dyn StatsSource>,
    notifier: Arc<dyn Notifier>,
    config: SignalingConfig,
}

/// Cheaply cloneable handle to the set of active calls.
#[derive(Clone)]
pub struct CallManager {
    inner: Arc<Inner>,
}

impl CallManager {
    pub fn new(
        local_id: impl Into<String>,
        transport: Arc<dyn SignalingTransport>,
        media: Arc<dyn MediaResources>,
        stats: Arc<dyn StatsSource>,
        notifier: Arc<dyn Notifier>,
        config: SignalingConfig,
    ) -> Self {
        CallManager {
            inner: Arc::new(Inner {
                local_id: local_id.into(),
                sessions: Mutex::new(HashMap::new()),
                transport,
                media,
                stats,
                notifier,
                config,
            }),
        }
    }

    pub fn config(&self) -> &SignalingConfig {
        &self.inner.config
    }

    /// Places an outgoing call: `idle -> invited`, then invites the peer.
    pub async fn start_call(&self, call_id: impl Into<CallId>, peer: impl Into<String>) -> Result<()> {
        let call_id = call_id.into();
        let peer = peer.into();
        let mut session = CallSession::new(
            call_id.clone(),
            peer.clone(),
            CallRole::Caller,
            self.inner.config.quality.clone(),
        );
        session.transition(CallState::Invited)?;
        let mut guard = self.insert(session)?.lock_owned().await;

        tracing::info!(%call_id, %peer, "starting call");
        self.inner.notifier.notify(Notification::CallInvited {
            call_id: call_id.clone(),
            peer,
            role: CallRole::Caller,
        });
        let invite = SignalMessage::Invite {
            call_id,
            from: self.inner.local_id.clone(),
        };
        self.send_or_fail(&mut guard, invite).await
    }

    /// Records an inbound invite. Returns true if a new session was created;
    /// repeated invites for a known call are absorbed without a second alert.
    pub async fn receive_invite(&self, call_id: impl Into<CallId>, from: impl Into<String>) -> Result<bool> {
        let call_id = call_id.into();
        let from = from.into();
        if let Some(existing) = self.find(&call_id) {
            let s = existing.lock().await;
            tracing::debug!(%call_id, state = %s.state, peer = %from, "duplicate invite absorbed");
            return Ok(false);
        }

        let mut session = CallSession::new(
            call_id.clone(),
            from.clone(),
            CallRole::Callee,
            self.inner.config.quality.clone(),
        );
        session.transition(CallState::Invited)?;
        match self.insert(session) {
            Ok(_) => {}
            // Lost a race with a concurrent invite for the same call.
            Err(Error::InvalidInput(_)) => return Ok(false),
            Err(e) => return Err(e),
        }
        tracing::info!(%call_id, peer = %from, "incoming call");
        self.inner.notifier.notify(Notification::CallInvited {
            call_id,
            peer: from,
            role: CallRole::Callee,
        });
        Ok(true)
    }

    /// Transmits the local description produced by the media library.
    ///
    /// A caller in `invited` sends its offer; a session holding an unanswered
    /// remote offer sends the answer. Entering `negotiating` arms the
    /// negotiation timer and starts stats sampling.
    pub async fn set_local_description(&self, call_id: &str, sdp: impl Into<String>) -> Result<()> {
        let sdp = sdp.into();
        let session = self.session(call_id)?;
        let mut s = session.lock().await;
        ensure_open(&s)?;

        let msg = if s.awaiting_local_answer {
            SignalMessage::Answer {
                call_id: s.call_id.clone(),
                sdp: sdp.clone(),
            }
        } else if s.state == CallState::Invited && s.role == CallRole::Caller {
            SignalMessage::Offer {
                call_id: s.call_id.clone(),
                sdp: sdp.clone(),
            }
        } else {
            return Err(Error::InvalidTransition {
                from: s.state.to_string(),
                to: CallState::Negotiating.to_string(),
            });
        };

        let entering = s.state == CallState::Invited;
        self.send_or_fail(&mut s, msg).await?;
        s.local_description = Some(sdp);
        s.awaiting_local_answer = false;
        if entering {
            s.transition(CallState::Negotiating)?;
            self.arm_timer(&mut s);
            self.start_sampler(&mut s);
        }
        self.flush_local_candidates(&mut s).await?;
        self.maybe_connect(&mut s);
        Ok(())
    }

    /// Appends a newly discovered local ICE candidate. Candidates are sent in
    /// discovery order, never ahead of the local description.
    pub async fn add_local_candidate(&self, call_id: &str, candidate: impl Into<String>) -> Result<()> {
        let session = self.session(call_id)?;
        let mut s = session.lock().await;
        ensure_open(&s)?;
        s.pending_candidates.push(candidate.into());
        if s.local_description.is_some() {
            self.flush_local_candidates(&mut s).await?;
        }
        Ok(())
    }

    /// Applies a message that the transport delivered from peer `sender`.
    ///
    /// Messages for unknown or ended calls are dropped, as are messages from
    /// anyone other than the call's peer and invites whose `from` does not
    /// match the sender.
    pub async fn handle_signal(&self, sender: &str, msg: SignalMessage) -> Result<()> {
        if let SignalMessage::Invite { call_id, from } = msg {
            if from != sender {
                tracing::warn!(%call_id, %from, sender, "invite sender mismatch, dropped");
                return Ok(());
            }
            self.receive_invite(call_id, from).await?;
            return Ok(());
        }
        let Some(session) = self.find(msg.call_id()) else {
            tracing::debug!(call_id = msg.call_id(), "signal for unknown call dropped");
            return Ok(());
        };
        let mut s = session.lock().await;
        if s.state == CallState::Ended {
            return Ok(());
        }
        if s.peer != sender {
            tracing::warn!(
                call_id = %s.call_id,
                sender,
                signal = signal_name(&msg),
                "signal from a peer outside the call, dropped"
            );
            return Ok(());
        }
        match msg {
            SignalMessage::Offer { sdp, .. } => self.on_remote_offer(&mut s, sdp).await,
            SignalMessage::Answer { sdp, .. } => self.on_remote_answer(&mut s, sdp).await,
            SignalMessage::Candidate { candidate, .. } => {
                self.on_remote_candidate(&mut s, candidate);
                Ok(())
            }
            SignalMessage::Hangup { .. } => {
                self.teardown(&mut s, EndReason::RemoteHangup, false).await;
                Ok(())
            }
            SignalMessage::Reject { .. } => {
                self.teardown(&mut s, EndReason::RemoteRejected, false).await;
                Ok(())
            }
            SignalMessage::Invite { .. } => Ok(()),
        }
    }

    /// Switches capture devices. A live call renegotiates in place with the
    /// new offer; the session keeps its identity throughout.
    pub async fn change_device(
        &self,
        call_id: &str,
        device: DeviceConfig,
        offer_sdp: impl Into<String>,
    ) -> Result<()> {
        let session = self.session(call_id)?;
        let mut s = session.lock().await;
        ensure_open(&s)?;
        s.device = device;
        if !matches!(s.state, CallState::Connected | CallState::Degraded) {
            // Not yet connected; the next description will carry the device.
            return Ok(());
        }

        tracing::info!(call_id, "device changed, renegotiating");
        s.transition(CallState::Negotiating)?;
        s.monitor.reset();
        s.remote_description = None;
        s.awaiting_local_answer = false;
        self.arm_timer(&mut s);

        let sdp = offer_sdp.into();
        let offer = SignalMessage::Offer {
            call_id: s.call_id.clone(),
            sdp: sdp.clone(),
        };
        self.send_or_fail(&mut s, offer).await?;
        s.local_description = Some(sdp);
        Ok(())
    }

    /// Feeds one stats sample for a call.
    ///
    /// While negotiating, a succeeded candidate pair confirms connectivity.
    /// While connected or degraded, the debounced quality monitor decides.
    pub async fn report_stats(&self, call_id: &str, stats: ConnectionStats) -> Result<()> {
        let session = self.session(call_id)?;
        let mut s = session.lock().await;
        ensure_open(&s)?;
        match s.state {
            CallState::Negotiating => {
                if stats.candidate_pair_succeeded {
                    s.pair_confirmed = true;
                    self.maybe_connect(&mut s);
                }
            }
            CallState::Connected | CallState::Degraded => {
                match (s.monitor.observe(&stats), s.state) {
                    (Some(QualityEvent::Degraded), CallState::Connected) => {
                        s.transition(CallState::Degraded)?;
                        tracing::warn!(call_id, rtt_ms = stats.rtt_ms, loss = stats.loss_ratio, "call degraded");
                        self.inner.notifier.notify(Notification::CallDegraded {
                            call_id: s.call_id.clone(),
                        });
                    }
                    (Some(QualityEvent::Recovered), CallState::Degraded) => {
                        s.transition(CallState::Connected)?;
                        tracing::info!(call_id, "call recovered");
                        self.inner.notifier.notify(Notification::CallRecovered {
                            call_id: s.call_id.clone(),
                        });
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Local hangup. The call is torn down once: a hangup that races an
    /// in-flight teardown is a no-op, and one issued after the call ended
    /// reports [`Error::CallNotFound`].
    pub async fn hangup(&self, call_id: &str) -> Result<()> {
        let session = self.session(call_id)?;
        let mut s = session.lock().await;
        self.teardown(&mut s, EndReason::LocalHangup, true).await;
        Ok(())
    }

    /// Declines an incoming call that has not been answered yet.
    pub async fn reject(&self, call_id: &str) -> Result<()> {
        let session = self.session(call_id)?;
        let mut s = session.lock().await;
        ensure_open(&s)?;
        if s.state != CallState::Invited || s.role != CallRole::Callee {
            return Err(Error::InvalidInput(format!(
                "call {call_id} cannot be rejected in state {}",
                s.state
            )));
        }
        self.teardown(&mut s, EndReason::Rejected, true).await;
        Ok(())
    }

    /// Ends a call after a local device or media transport failure.
    pub async fn fail(&self, call_id: &str, reason: &str) -> Result<()> {
        let session = self.session(call_id)?;
        let mut s = session.lock().await;
        tracing::error!(call_id, reason, "media failure, ending call");
        self.teardown(&mut s, EndReason::TransportFatal, true).await;
        Ok(())
    }

    pub async fn snapshot(&self, call_id: &str) -> Result<CallSnapshot> {
        let session = self.session(call_id)?;
        let s = session.lock().await;
        Ok(s.snapshot())
    }

    pub fn active_calls(&self) -> Vec<CallId> {
        let mut ids: Vec<CallId> = self.sessions().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Hangs up every active call.
    pub async fn shutdown(&self) {
        for call_id in self.active_calls() {
            if let Err(e) = self.hangup(&call_id).await {
                tracing::debug!(%call_id, error = %e, "call already gone at shutdown");
            }
        }
    }

    /// Ends the call with a signaling timeout if it is still negotiating
    /// under the timer generation `epoch`. Returns true if this call ended it.
    pub(crate) async fn negotiation_timed_out(&self, call_id: &str, epoch: u64) -> bool {
        let Some(session) = self.find(call_id) else {
            return false;
        };
        let mut s = session.lock().await;
        if s.state != CallState::Negotiating || s.epoch != epoch {
            return false;
        }
        let err = Error::SignalingTimeout {
            call_id: call_id.to_string(),
        };
        tracing::warn!(error = %err, epoch, "negotiation did not complete");
        self.teardown(&mut s, EndReason::SignalingTimeout, true).await
    }

    async fn on_remote_offer(&self, s: &mut CallSession, sdp: String) -> Result<()> {
        match s.state {
            CallState::Connected | CallState::Degraded => {
                tracing::info!(call_id = %s.call_id, "remote renegotiation");
                s.transition(CallState::Negotiating)?;
                s.monitor.reset();
                self.arm_timer(s);
            }
            CallState::Invited | CallState::Negotiating => {}
            _ => return Ok(()),
        }
        s.local_description = None;
        self.apply_remote_description(s, sdp).await?;
        s.awaiting_local_answer = true;
        Ok(())
    }

    async fn on_remote_answer(&self, s: &mut CallSession, sdp: String) -> Result<()> {
        if s.state != CallState::Negotiating
            || s.local_description.is_none()
            || s.awaiting_local_answer
        {
            tracing::warn!(call_id = %s.call_id, state = %s.state, "unexpected answer ignored");
            return Ok(());
        }
        self.apply_remote_description(s, sdp).await?;
        self.maybe_connect(s);
        Ok(())
    }

    fn on_remote_candidate(&self, s: &mut CallSession, candidate: String) {
        if s.remote_description.is_none() {
            tracing::debug!(call_id = %s.call_id, "buffering remote candidate");
            s.buffered_remote_candidates.push(candidate);
            return;
        }
        if let Err(e) = self.inner.media.add_remote_candidate(&s.call_id, &candidate) {
            tracing::warn!(call_id = %s.call_id, error = %e, "remote candidate rejected by media");
        }
    }

    /// Applies a remote description, then every candidate buffered ahead of it.
    async fn apply_remote_description(&self, s: &mut CallSession, sdp: String) -> Result<()> {
        if let Err(e) = self.inner.media.apply_remote_description(&s.call_id, &sdp) {
            tracing::error!(call_id = %s.call_id, error = %e, "remote description rejected by media");
            self.teardown(s, EndReason::TransportFatal, true).await;
            return Err(Error::TransportFatal(e.to_string()));
        }
        s.remote_description = Some(sdp);
        for candidate in std::mem::take(&mut s.buffered_remote_candidates) {
            if let Err(e) = self.inner.media.add_remote_candidate(&s.call_id, &candidate) {
                tracing::warn!(call_id = %s.call_id, error = %e, "buffered candidate rejected by media");
            }
        }
        Ok(())
    }

    fn maybe_connect(&self, s: &mut CallSession) {
        if !s.ready_to_connect() {
            return;
        }
        if s.transition(CallState::Connected).is_ok() {
            s.cancel_timer();
            s.monitor.reset();
            tracing::info!(call_id = %s.call_id, "call connected");
        }
    }

    async fn flush_local_candidates(&self, s: &mut CallSession) -> Result<()> {
        while s.sent_candidates < s.pending_candidates.len() {
            let msg = SignalMessage::Candidate {
                call_id: s.call_id.clone(),
                candidate: s.pending_candidates[s.sent_candidates].clone(),
            };
            self.send_or_fail(s, msg).await?;
            s.sent_candidates += 1;
        }
        Ok(())
    }

    /// Sends with retry; a send that never gets through ends the call.
    async fn send_or_fail(&self, s: &mut CallSession, msg: SignalMessage) -> Result<()> {
        match self.send_with_retry(&s.peer, msg).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(call_id = %s.call_id, error = %e, "signaling transport failed");
                self.teardown(s, EndReason::TransportFatal, false).await;
                Err(e)
            }
        }
    }

    async fn send_with_retry(&self, peer: &str, msg: SignalMessage) -> Result<()> {
        let attempts = self.inner.config.send_attempts.max(1);
        let backoff = self.inner.config.send_backoff();
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(backoff.delay(attempt - 1)).await;
            }
            match self.inner.transport.send(peer, msg.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    tracing::debug!(peer, attempt, error = %e, "signaling send failed, retrying");
                    last_error = e.to_string();
                }
                Err(e) => {
                    last_error = e.to_string();
                    break;
                }
            }
        }
        Err(Error::TransportFatal(format!(
            "could not deliver {} for call {} to {peer}: {last_error}",
            signal_name(&msg),
            msg.call_id()
        )))
    }

    /// The single cleanup path for every way a call can end.
    ///
    /// Runs under the session lock. Returns false if the call had already
    /// ended, in which case nothing is released or sent again.
    async fn teardown(&self, s: &mut CallSession, reason: EndReason, notify_remote: bool) -> bool {
        if s.state == CallState::Ended {
            return false;
        }
        s.state = CallState::Ended;
        s.end_reason = Some(reason);
        s.cancel_timer();
        s.cancel_sampler();
        self.inner.media.release(&s.call_id);
        self.sessions().remove(&s.call_id);

        tracing::info!(call_id = %s.call_id, ?reason, "call ended");
        self.inner.notifier.notify(Notification::CallEnded {
            call_id: s.call_id.clone(),
            reason,
        });

        if notify_remote {
            let call_id = s.call_id.clone();
            let msg = match reason {
                EndReason::Rejected => SignalMessage::Reject { call_id },
                _ => SignalMessage::Hangup { call_id },
            };
            if let Err(e) = self.send_with_retry(&s.peer, msg).await {
                tracing::warn!(call_id = %s.call_id, error = %e, "remote peer not told about call end");
            }
        }
        true
    }

    /// Arms a fresh negotiation timer, invalidating any earlier one.
    fn arm_timer(&self, s: &mut CallSession) {
        s.cancel_timer();
        s.epoch += 1;
        let token = CancellationToken::new();
        s.timer = Some(token.clone());

        let weak = Arc::downgrade(&self.inner);
        let call_id = s.call_id.clone();
        let epoch = s.epoch;
        let timeout = self.inner.config.negotiation_timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(manager) = upgrade(&weak) {
                        manager.negotiation_timed_out(&call_id, epoch).await;
                    }
                }
            }
        });
    }

    /// Starts the per-call stats sampler unless one is already running.
    fn start_sampler(&self, s: &mut CallSession) {
        if s.sampler.is_some() {
            return;
        }
        let token = CancellationToken::new();
        s.sampler = Some(token.clone());

        let weak = Arc::downgrade(&self.inner);
        let call_id = s.call_id.clone();
        let period = self.inner.config.stats_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(manager) = upgrade(&weak) else {
                    break;
                };
                let Some(stats) = manager.inner.stats.sample(&call_id).await else {
                    continue;
                };
                match manager.report_stats(&call_id, stats).await {
                    Ok(()) => {}
                    Err(Error::CallNotFound(_)) => break,
                    Err(e) => tracing::warn!(%call_id, error = %e, "stats sample not applied"),
                }
            }
            tracing::debug!(%call_id, "stats sampler stopped");
        });
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<CallId, SharedSession>> {
        self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn find(&self, call_id: &str) -> Option<SharedSession> {
        self.sessions().get(call_id).cloned()
    }

    fn session(&self, call_id: &str) -> Result<SharedSession> {
        self.find(call_id)
            .ok_or_else(|| Error::CallNotFound(call_id.to_string()))
    }

    fn insert(&self, session: CallSession) -> Result<SharedSession> {
        let call_id = session.call_id.clone();
        let mut sessions = self.sessions();
        if sessions.contains_key(&call_id) {
            return Err(Error::InvalidInput(format!("call {call_id} already exists")));
        }
        let shared = Arc::new(AsyncMutex::new(session));
        sessions.insert(call_id, Arc::clone(&shared));
        Ok(shared)
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<CallManager> {
    weak.upgrade().map(|inner| CallManager { inner })
}

fn ensure_open(s: &CallSession) -> Result<()> {
    if s.state == CallState::Ended {
        return Err(Error::CallNotFound(s.call_id.clone()));
    }
    Ok(())
}

fn signal_name(msg: &SignalMessage) -> &'static str {
    match msg {
        SignalMessage::Invite { .. } => "invite",
        SignalMessage::Offer { .. } => "offer",
        SignalMessage::Answer { .. } => "answer",
        SignalMessage::Candidate { .. } => "candidate",
        SignalMessage::Hangup { .. } => "hangup",
        SignalMessage::Reject { .. } => "reject",
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
