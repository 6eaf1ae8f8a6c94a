// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Replay of the offline queue once connectivity returns.
//!
//! A drain walks the queue strictly in id order and replays each request
//! verbatim:
//!
//! - success: the action is removed
//! - application rejection: the action is removed and reported as failed
//! - network unavailable: the drain stops, leaving this and every later
//!   action queued in order
//!
//! At most one drain runs at a time. A trigger that arrives during a drain is
//! coalesced into one more drain after the current one. The scheduler task
//! retries with exponential backoff while actions remain.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::error::{Error, Result};
use crate::notify::{Notification, Notifier};
use crate::queue::{ActionId, OfflineQueue};
use crate::request::Network;

/// Configuration for the sync orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Initial delay for exponential backoff (milliseconds).
    pub initial_delay_ms: u64,
    /// Maximum delay between retries (seconds).
    pub max_delay_secs: u64,
    /// Periodic sync interval when the queue is healthy (seconds).
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            initial_delay_ms: 1_000,
            max_delay_secs: 300,
            interval_secs: 900,
        }
    }
}

impl SyncConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_secs(self.max_delay_secs),
        )
    }
}

/// An action the server refused during replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedAction {
    pub id: ActionId,
    pub url: String,
    /// HTTP status, if the server answered.
    pub status: Option<u16>,
    pub message: String,
}

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub succeeded: usize,
    pub failed: usize,
    pub remaining: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedAction>,
}

/// Result of a [`SyncOrchestrator::run_sync`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRun {
    Completed(SyncReport),
    /// Another drain was in progress; it will run once more when it finishes.
    Coalesced,
}

#[derive(Default)]
struct DrainState {
    running: bool,
    rerun: bool,
}

/// Clears the running flag however the drain exits, including cancellation.
/// A pending rerun survives so the trigger behind it is not lost.
struct RunningGuard<'a>(&'a Mutex<DrainState>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock().unwrap_or_else(|e| e.into_inner());
        state.running = false;
    }
}

pub struct SyncOrchestrator {
    queue: Arc<OfflineQueue>,
    network: Arc<dyn Network>,
    notifier: Arc<dyn Notifier>,
    config: SyncConfig,
    shutdown: CancellationToken,
    state: Mutex<DrainState>,
    wake: Notify,
}

impl SyncOrchestrator {
    pub fn new(
        queue: Arc<OfflineQueue>,
        network: Arc<dyn Network>,
        notifier: Arc<dyn Notifier>,
        config: SyncConfig,
        shutdown: CancellationToken,
    ) -> Self {
        SyncOrchestrator {
            queue,
            network,
            notifier,
            config,
            shutdown,
            state: Mutex::new(DrainState::default()),
            wake: Notify::new(),
        }
    }

    /// Signal that connectivity is back; the scheduler drains immediately.
    pub fn connectivity_restored(&self) {
        self.wake.notify_one();
    }

    /// Drain the queue now, or coalesce with a drain already in progress.
    pub async fn run_sync(&self) -> Result<SyncRun> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.running {
                state.rerun = true;
                tracing::debug!("sync already running, coalescing trigger");
                return Ok(SyncRun::Coalesced);
            }
            state.running = true;
        }
        let _guard = RunningGuard(&self.state);

        loop {
            let report = match self.drain().await {
                Ok(report) => report,
                Err(e) => {
                    if !matches!(e, Error::Cancelled) && self.take_rerun() {
                        // Hand the coalesced trigger to the scheduler.
                        tracing::debug!(error = %e, "drain failed with a trigger pending");
                        self.wake.notify_one();
                    }
                    return Err(e);
                }
            };
            if !self.take_rerun() {
                return Ok(SyncRun::Completed(report));
            }
        }
    }

    fn take_rerun(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut state.rerun)
    }

    async fn drain(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for action in self.queue.list()? {
            if self.shutdown.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let action = match self.queue.record_attempt(action.id) {
                Ok(action) => action,
                // Cancelled by the user while we were draining.
                Err(Error::ActionNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let request = action.to_request();

            let outcome = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
                outcome = self.network.send(&request) => outcome,
            };

            match outcome {
                Ok(resp) if resp.is_success() => {
                    self.queue.remove(action.id)?;
                    report.succeeded += 1;
                }
                Ok(resp) => {
                    let status = resp.status;
                    let message = resp.into_rejection().to_string();
                    self.reject(&mut report, action.id, action.url, Some(status), message)?;
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(id = action.id, error = %e, "still offline, stopping drain");
                    break;
                }
                Err(e) => {
                    self.reject(&mut report, action.id, action.url, None, e.to_string())?;
                }
            }
        }

        report.remaining = self.queue.len()?;
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            remaining = report.remaining,
            "sync run complete"
        );
        self.notifier
            .notify(Notification::SyncComplete(report.clone()));
        Ok(report)
    }

    fn reject(
        &self,
        report: &mut SyncReport,
        id: ActionId,
        url: String,
        status: Option<u16>,
        message: String,
    ) -> Result<()> {
        tracing::warn!(id, %url, ?status, %message, "replay rejected, dropping queued action");
        self.queue.remove(id)?;
        report.failed += 1;
        report.rejected.push(RejectedAction {
            id,
            url,
            status,
            message,
        });
        Ok(())
    }

    /// Background loop: drain on start, on connectivity signals, periodically,
    /// and with backoff while actions remain. Exits on shutdown.
    pub async fn run_scheduler(self: Arc<Self>) {
        let backoff = self.config.backoff();
        let interval = Duration::from_secs(self.config.interval_secs);
        let mut delay = Duration::ZERO;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(delay) => {}
            }

            delay = match self.run_sync().await {
                Ok(SyncRun::Completed(report)) if report.remaining > 0 => {
                    let attempts = match self.queue.head() {
                        Ok(head) => head.map_or(1, |a| a.attempts),
                        Err(_) => 1,
                    };
                    let next = backoff.delay(attempts.max(1));
                    tracing::debug!(remaining = report.remaining, ?next, "scheduling sync retry");
                    next
                }
                Ok(SyncRun::Completed(_)) => interval,
                Ok(SyncRun::Coalesced) => backoff.delay(1),
                Err(Error::Cancelled) => break,
                Err(e) => {
                    tracing::error!(error = %e, "sync run failed");
                    backoff.max()
                }
            };
        }
        tracing::debug!("sync scheduler stopped");
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
