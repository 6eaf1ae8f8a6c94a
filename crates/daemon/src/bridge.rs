// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Adapters between the call manager and the host's media library.
//!
//! The media library lives in the host process, so media calls become
//! [`MediaAction`] lines on stdout and transport statistics arrive as `stats`
//! commands on stdin.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use lifeline_core::{ConnectionStats, MediaResources, StatsSource};

use crate::protocol::{DaemonEvent, MediaAction};

/// Serialized event sink. Cloneable; lines are written in send order.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<String>,
}

impl Outbox {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbox { tx }, rx)
    }

    pub fn emit(&self, event: &DaemonEvent) {
        match serde_json::to_string(event) {
            Ok(line) => {
                if self.tx.send(line).is_err() {
                    tracing::debug!("outbox closed, event dropped");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize daemon event"),
        }
    }
}

/// Drains the outbox into `writer`, one JSON document per line.
pub async fn write_lines<W>(mut rx: mpsc::UnboundedReceiver<String>, mut writer: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Latest unconsumed stats sample per call, fed by `stats` commands.
#[derive(Default)]
pub struct LatestStats {
    samples: Mutex<HashMap<String, ConnectionStats>>,
}

impl LatestStats {
    pub fn record(&self, call_id: &str, stats: ConnectionStats) {
        self.lock().insert(call_id.to_string(), stats);
    }

    pub fn forget(&self, call_id: &str) {
        self.lock().remove(call_id);
    }

    /// Takes the pending sample so each report is observed once.
    pub fn take(&self, call_id: &str) -> Option<ConnectionStats> {
        self.lock().remove(call_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ConnectionStats>> {
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StatsSource for LatestStats {
    fn sample<'a>(
        &'a self,
        call_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<ConnectionStats>> + Send + 'a>> {
        let sample = self.take(call_id);
        Box::pin(async move { sample })
    }
}

/// Media resources that forward every call to the host as a media event.
pub struct HostMedia {
    outbox: Outbox,
    stats: Arc<LatestStats>,
}

impl HostMedia {
    pub fn new(outbox: Outbox, stats: Arc<LatestStats>) -> Self {
        HostMedia { outbox, stats }
    }
}

impl MediaResources for HostMedia {
    fn apply_remote_description(&self, call_id: &str, sdp: &str) -> lifeline_core::Result<()> {
        self.outbox
            .emit(&DaemonEvent::Media(MediaAction::ApplyRemoteDescription {
                call_id: call_id.to_string(),
                sdp: sdp.to_string(),
            }));
        Ok(())
    }

    fn add_remote_candidate(&self, call_id: &str, candidate: &str) -> lifeline_core::Result<()> {
        self.outbox
            .emit(&DaemonEvent::Media(MediaAction::AddRemoteCandidate {
                call_id: call_id.to_string(),
                candidate: candidate.to_string(),
            }));
        Ok(())
    }

    fn release(&self, call_id: &str) {
        self.stats.forget(call_id);
        self.outbox.emit(&DaemonEvent::Media(MediaAction::Release {
            call_id: call_id.to_string(),
        }));
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
