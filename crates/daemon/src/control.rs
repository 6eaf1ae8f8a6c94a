// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch of control commands to the core components.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use lifeline_core::{
    CacheTierManager, CallManager, Error as CoreError, FetchOutcome, OfflineQueue, PushDispatcher,
    PushOutcome, Request, RequestPipeline, SyncOrchestrator, SyncRun,
};

use crate::bridge::{LatestStats, Outbox};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{insert_body, ControlCommand, ControlEnvelope, DaemonEvent, FetchCommand};

/// How long commands still in flight at shutdown may run before being aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Everything a control command can reach.
pub struct Daemon {
    pub config: Config,
    pub pipeline: RequestPipeline,
    pub cache: Arc<CacheTierManager>,
    pub queue: Arc<OfflineQueue>,
    pub sync: Arc<SyncOrchestrator>,
    pub calls: CallManager,
    pub push: PushDispatcher,
    pub stats: Arc<LatestStats>,
}

/// Reads control lines until `shutdown`, end of input, or `stop`.
///
/// Each command runs on its own task, so a slow fetch or sync never holds
/// up a hangup. Replies carry the request `id` and may arrive out of order.
/// `shutdown` is answered on the loop itself once input stops being read.
pub async fn serve<R>(daemon: Arc<Daemon>, input: R, outbox: Outbox, stop: CancellationToken)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut tasks = JoinSet::new();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = stop.cancelled() => {
                tracing::info!("interrupted");
                break;
            }
            // Reap finished commands so the set does not grow unbounded.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => continue,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("control input closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to read control input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Err(reply) => outbox.emit(&reply),
            Ok(ControlEnvelope {
                id,
                command: ControlCommand::Shutdown,
            }) => {
                outbox.emit(&DaemonEvent::success(id, Value::Null));
                break;
            }
            Ok(envelope) => {
                let daemon = daemon.clone();
                let outbox = outbox.clone();
                tasks.spawn(async move {
                    outbox.emit(&daemon.dispatch(envelope).await);
                });
            }
        }
    }

    let in_flight = tasks.len();
    if in_flight > 0 {
        tracing::debug!(in_flight, "waiting for commands in flight");
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining = tasks.len(), "aborting commands still in flight");
            tasks.shutdown().await;
        }
    }
}

/// Parses one control line, or returns the error reply for it.
pub fn parse_line(line: &str) -> std::result::Result<ControlEnvelope, DaemonEvent> {
    serde_json::from_str(line).map_err(|e| {
        tracing::warn!(error = %e, "unparseable control line");
        DaemonEvent::failure(None, "invalid_command", e.to_string())
    })
}

impl Daemon {
    /// Runs one command and builds the reply for it.
    pub async fn dispatch(&self, envelope: ControlEnvelope) -> DaemonEvent {
        let id = envelope.id;
        match self.execute(envelope.command).await {
            Ok(result) => DaemonEvent::success(id, result),
            Err(e) => {
                tracing::debug!(?id, error = %e, "control command failed");
                DaemonEvent::failure(id, error_kind(&e), e.to_string())
            }
        }
    }

    pub async fn execute(&self, command: ControlCommand) -> Result<Value> {
        match command {
            ControlCommand::Push { payload } => {
                let raw = match payload {
                    Value::String(raw) => raw,
                    other => other.to_string(),
                };
                Ok(match self.push.on_push(&raw).await {
                    PushOutcome::Invited { call_id, alerted } => {
                        json!({ "outcome": "invited", "call_id": call_id, "alerted": alerted })
                    }
                    PushOutcome::Synced(SyncRun::Completed(report)) => {
                        json!({ "outcome": "synced", "report": report })
                    }
                    PushOutcome::Synced(SyncRun::Coalesced) => {
                        json!({ "outcome": "synced", "coalesced": true })
                    }
                    PushOutcome::Dropped => json!({ "outcome": "dropped" }),
                })
            }
            ControlCommand::ConnectivityRestored => {
                self.sync.connectivity_restored();
                Ok(Value::Null)
            }
            ControlCommand::Sync => match self.sync.run_sync().await? {
                SyncRun::Completed(report) => Ok(serde_json::to_value(report).map_err(CoreError::from)?),
                SyncRun::Coalesced => Ok(json!({ "coalesced": true })),
            },
            ControlCommand::Fetch(fetch) => self.fetch(fetch).await,
            ControlCommand::ListQueue => {
                let actions = self.queue.list()?;
                Ok(serde_json::to_value(actions).map_err(CoreError::from)?)
            }
            ControlCommand::CancelAction { action_id } => {
                self.queue.cancel(action_id)?;
                Ok(Value::Null)
            }
            ControlCommand::PurgeCache => {
                let removed = self.cache.purge_expired()?;
                Ok(json!({ "removed": removed }))
            }
            ControlCommand::StartCall { call_id, peer } => {
                self.calls.start_call(call_id, peer).await?;
                Ok(Value::Null)
            }
            ControlCommand::SetLocalDescription { call_id, sdp } => {
                self.calls.set_local_description(&call_id, sdp).await?;
                Ok(Value::Null)
            }
            ControlCommand::AddLocalCandidate { call_id, candidate } => {
                self.calls.add_local_candidate(&call_id, candidate).await?;
                Ok(Value::Null)
            }
            ControlCommand::ChangeDevice {
                call_id,
                device,
                sdp,
            } => {
                self.calls.change_device(&call_id, device, sdp).await?;
                Ok(Value::Null)
            }
            ControlCommand::Stats { call_id, stats } => {
                self.stats.record(&call_id, stats);
                Ok(Value::Null)
            }
            ControlCommand::Hangup { call_id } => {
                self.calls.hangup(&call_id).await?;
                Ok(Value::Null)
            }
            ControlCommand::Reject { call_id } => {
                self.calls.reject(&call_id).await?;
                Ok(Value::Null)
            }
            ControlCommand::Fail { call_id, reason } => {
                self.calls.fail(&call_id, &reason).await?;
                Ok(Value::Null)
            }
            ControlCommand::Snapshot { call_id } => {
                let snapshot = self.calls.snapshot(&call_id).await?;
                Ok(serde_json::to_value(snapshot).map_err(CoreError::from)?)
            }
            ControlCommand::ListCalls => Ok(json!(self.calls.active_calls())),
            ControlCommand::Shutdown => Ok(Value::Null),
        }
    }

    async fn fetch(&self, fetch: FetchCommand) -> Result<Value> {
        let url = self.config.resolve_url(&fetch.url)?;
        let body = fetch.body_bytes()?;
        let mut request = Request::new(fetch.method, url).with_destination(fetch.destination);
        request.headers = fetch.headers;
        request.body = body;
        match self.pipeline.fetch(&request).await? {
            FetchOutcome::Response(resp) => {
                let mut reply = Map::new();
                reply.insert("status".to_string(), json!(resp.status));
                reply.insert("headers".to_string(), json!(resp.headers));
                insert_body(&mut reply, &resp.body);
                Ok(Value::Object(reply))
            }
            FetchOutcome::Queued { id } => Ok(json!({ "queued": id })),
        }
    }
}

/// Stable, machine-readable error kind for replies.
pub fn error_kind(e: &Error) -> &'static str {
    match e {
        Error::Core(core) => match core {
            CoreError::NetworkUnavailable(_) => "network_unavailable",
            CoreError::ApplicationRejected { .. } => "application_rejected",
            CoreError::SignalingTimeout { .. } => "signaling_timeout",
            CoreError::TransportFatal(_) => "transport_fatal",
            CoreError::StorageCorrupt(_) => "storage_corrupt",
            CoreError::InvalidTransition { .. } => "invalid_transition",
            CoreError::CallNotFound(_) => "call_not_found",
            CoreError::ActionNotFound(_) => "action_not_found",
            CoreError::InvalidInput(_) | CoreError::Url(_) | CoreError::Json(_) => "invalid_input",
            CoreError::Cancelled => "cancelled",
            CoreError::Database(_) | CoreError::Io(_) => "storage",
        },
        Error::Config(_) | Error::ConfigParse { .. } => "invalid_input",
        Error::AlreadyRunning | Error::Io(_) | Error::Http(_) => "internal",
    }
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
