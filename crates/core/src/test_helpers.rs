// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared mocks for unit tests.

#![allow(clippy::unwrap_used)]
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::clock::ClockSource;
use crate::error::{Error, Result};
use crate::notify::{Notification, Notifier};
use crate::quality::{ConnectionStats, StatsSource};
use crate::request::{Network, Request, Response};
use crate::signaling::{MediaResources, SignalMessage, SignalingTransport};

/// Clock whose time only moves when the test says so.
#[derive(Default)]
pub struct MockClock {
    now_ms: AtomicU64,
}

impl MockClock {
    pub fn at(ms: u64) -> Arc<Self> {
        Arc::new(MockClock {
            now_ms: AtomicU64::new(ms),
        })
    }

    pub fn set_secs(&self, secs: u64) {
        self.now_ms.store(secs * 1000, Ordering::SeqCst);
    }
}

impl ClockSource for MockClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Scripted network outcome.
#[derive(Clone, Debug)]
pub enum Scripted {
    Respond(Response),
    Offline,
}

/// Mock network with per-URL scripted outcomes.
///
/// Each URL has a queue of outcomes; the last one is sticky. Unscripted URLs
/// answer `200` with the URL as body. A global offline switch overrides
/// everything.
#[derive(Default)]
pub struct MockNetwork {
    offline: AtomicBool,
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    sent: Mutex<Vec<Request>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn script(&self, url: &str, outcomes: Vec<Scripted>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), outcomes.into());
    }

    pub fn respond(&self, url: &str, resp: Response) {
        self.script(url, vec![Scripted::Respond(resp)]);
    }

    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_urls(&self) -> Vec<String> {
        self.sent().into_iter().map(|r| r.url).collect()
    }

    fn next_outcome(&self, url: &str) -> Scripted {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Scripted::Respond(Response::ok(url.as_bytes().to_vec())),
        }
    }
}

impl Network for MockNetwork {
    fn send<'a>(
        &'a self,
        request: &'a Request,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + 'a>> {
        Box::pin(async move {
            self.sent.lock().unwrap().push(request.clone());
            if self.offline.load(Ordering::SeqCst) {
                return Err(Error::NetworkUnavailable("mock offline".into()));
            }
            match self.next_outcome(&request.url) {
                Scripted::Respond(resp) => Ok(resp),
                Scripted::Offline => Err(Error::NetworkUnavailable("mock offline".into())),
            }
        })
    }
}

/// Notifier that records everything it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn all(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Notification) -> bool) -> usize {
        self.seen.lock().unwrap().iter().filter(|n| pred(n)).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().unwrap().push(notification);
    }
}

/// Signaling transport that records what it sends and can be told to fail.
#[derive(Default)]
pub struct MockSignaling {
    sent: Mutex<Vec<(String, SignalMessage)>>,
    failing: AtomicBool,
    attempts: AtomicU32,
}

impl MockSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every delivered message, in order.
    pub fn sent(&self) -> Vec<SignalMessage> {
        self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn peers(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    /// Send attempts, including failed ones.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn count(&self, pred: impl Fn(&SignalMessage) -> bool) -> usize {
        self.sent.lock().unwrap().iter().filter(|(_, m)| pred(m)).count()
    }
}

impl SignalingTransport for MockSignaling {
    fn send<'a>(
        &'a self,
        peer: &'a str,
        msg: SignalMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::NetworkUnavailable("relay down".into()));
            }
            self.sent.lock().unwrap().push((peer.to_string(), msg));
            Ok(())
        })
    }
}

/// Calls made into the media library.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaEvent {
    RemoteDescription(String, String),
    RemoteCandidate(String, String),
    Release(String),
}

#[derive(Default)]
pub struct MockMedia {
    events: Mutex<Vec<MediaEvent>>,
    reject_descriptions: AtomicBool,
}

impl MockMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_descriptions(&self, reject: bool) {
        self.reject_descriptions.store(reject, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<MediaEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn releases(&self, call_id: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == MediaEvent::Release(call_id.to_string()))
            .count()
    }
}

impl MediaResources for MockMedia {
    fn apply_remote_description(&self, call_id: &str, sdp: &str) -> Result<()> {
        if self.reject_descriptions.load(Ordering::SeqCst) {
            return Err(Error::TransportFatal("bad sdp".into()));
        }
        self.events
            .lock()
            .unwrap()
            .push(MediaEvent::RemoteDescription(call_id.into(), sdp.into()));
        Ok(())
    }

    fn add_remote_candidate(&self, call_id: &str, candidate: &str) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(MediaEvent::RemoteCandidate(call_id.into(), candidate.into()));
        Ok(())
    }

    fn release(&self, call_id: &str) {
        self.events
            .lock()
            .unwrap()
            .push(MediaEvent::Release(call_id.into()));
    }
}

/// Stats source returning whatever the test last set for a call.
#[derive(Default)]
pub struct MockStats {
    current: Mutex<HashMap<String, ConnectionStats>>,
}

impl MockStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, call_id: &str, stats: ConnectionStats) {
        self.current
            .lock()
            .unwrap()
            .insert(call_id.to_string(), stats);
    }
}

impl StatsSource for MockStats {
    fn sample<'a>(
        &'a self,
        call_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<ConnectionStats>> + Send + 'a>> {
        Box::pin(async move { self.current.lock().unwrap().get(call_id).copied() })
    }
}
