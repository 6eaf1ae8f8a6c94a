// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Signaling relay client over WebSocket.
//!
//! One background task owns the socket. It registers this peer with the
//! relay, writes outbound signals handed to it by [`RelaySignaling`], and
//! forwards inbound signals to a channel the daemon feeds into the call
//! manager. Lost connections are re-established with exponential backoff;
//! while disconnected, sends fail fast as network-unavailable so the call
//! manager's own retry policy applies.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lifeline_core::{Backoff, Error as CoreError, SignalMessage, SignalingTransport};

/// Frames exchanged with the relay server.
///
/// On outbound `signal` frames `peer` is the recipient; on inbound ones it is
/// the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayFrame {
    Register { peer_id: String },
    Signal { peer: String, message: SignalMessage },
}

impl RelayFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// A signal delivered by the relay, tagged with the peer that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSignal {
    pub sender: String,
    pub message: SignalMessage,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ServeError = Box<dyn std::error::Error + Send + Sync>;

struct Outbound {
    frame: RelayFrame,
    ack: oneshot::Sender<lifeline_core::Result<()>>,
}

/// Send half handed to the call manager.
#[derive(Clone)]
pub struct RelaySignaling {
    tx: mpsc::Sender<Outbound>,
    connected: Arc<AtomicBool>,
}

impl RelaySignaling {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl SignalingTransport for RelaySignaling {
    fn send<'a>(
        &'a self,
        peer: &'a str,
        msg: SignalMessage,
    ) -> Pin<Box<dyn Future<Output = lifeline_core::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if !self.is_connected() {
                return Err(CoreError::NetworkUnavailable("relay not connected".into()));
            }
            let (ack, done) = oneshot::channel();
            let frame = RelayFrame::Signal {
                peer: peer.to_string(),
                message: msg,
            };
            self.tx
                .send(Outbound { frame, ack })
                .await
                .map_err(|_| CoreError::TransportFatal("relay client stopped".into()))?;
            done.await
                .map_err(|_| CoreError::NetworkUnavailable("relay connection dropped".into()))?
        })
    }
}

/// Connection-owning half; run it on its own task.
pub struct RelayClient {
    url: String,
    peer_id: String,
    backoff: Backoff,
    connected: Arc<AtomicBool>,
    rx: mpsc::Receiver<Outbound>,
    inbound: mpsc::UnboundedSender<InboundSignal>,
}

enum Served {
    Shutdown,
    Disconnected,
}

/// Creates the two halves of a relay connection plus the inbound signal stream.
pub fn channel(
    url: impl Into<String>,
    peer_id: impl Into<String>,
    backoff: Backoff,
) -> (
    RelaySignaling,
    RelayClient,
    mpsc::UnboundedReceiver<InboundSignal>,
) {
    let (tx, rx) = mpsc::channel(64);
    let (inbound, inbound_rx) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(false));
    let signaling = RelaySignaling {
        tx,
        connected: Arc::clone(&connected),
    };
    let client = RelayClient {
        url: url.into(),
        peer_id: peer_id.into(),
        backoff,
        connected,
        rx,
        inbound,
    };
    (signaling, client, inbound_rx)
}

impl RelayClient {
    /// Connects, serves, and reconnects until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                let delay = self.backoff.delay(attempt);
                debug!(attempt, ?delay, "reconnecting to relay");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let connected = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = tokio_tungstenite::connect_async(self.url.as_str()) => result,
            };
            match connected {
                Ok((socket, _)) => {
                    info!(url = %self.url, "connected to relay");
                    attempt = 0;
                    let served = self.serve(socket, &shutdown).await;
                    self.connected.store(false, Ordering::SeqCst);
                    self.fail_pending();
                    match served {
                        Ok(Served::Shutdown) => break,
                        Ok(Served::Disconnected) => info!("relay closed the connection"),
                        Err(e) => warn!(error = %e, "relay connection lost"),
                    }
                }
                Err(e) => warn!(url = %self.url, attempt, error = %e, "relay connect failed"),
            }
            attempt = attempt.saturating_add(1);
        }
        self.connected.store(false, Ordering::SeqCst);
        debug!("relay client stopped");
    }

    async fn serve(
        &mut self,
        socket: Socket,
        shutdown: &CancellationToken,
    ) -> Result<Served, ServeError> {
        let (mut sink, mut stream) = socket.split();
        self.connected.store(true, Ordering::SeqCst);
        let register = RelayFrame::Register {
            peer_id: self.peer_id.clone(),
        };
        sink.send(Message::Text(register.to_json()?.into())).await?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = sink.close().await;
                    return Ok(Served::Shutdown);
                }

                outbound = self.rx.recv() => {
                    let Some(Outbound { frame, ack }) = outbound else {
                        // Every sender is gone; nothing will ever be sent again.
                        let _ = sink.close().await;
                        return Ok(Served::Shutdown);
                    };
                    let json = frame.to_json()?;
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        let _ = ack.send(Err(CoreError::NetworkUnavailable(e.to_string())));
                        return Err(e.into());
                    }
                    let _ = ack.send(Ok(()));
                }

                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.on_text(&text),
                        Some(Ok(Message::Ping(data))) => {
                            sink.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(Served::Disconnected),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    fn on_text(&self, text: &str) {
        match RelayFrame::from_json(text) {
            Ok(RelayFrame::Signal { peer, message }) => {
                debug!(%peer, call_id = message.call_id(), "signal from relay");
                let signal = InboundSignal {
                    sender: peer,
                    message,
                };
                if self.inbound.send(signal).is_err() {
                    debug!("inbound signal receiver dropped");
                }
            }
            Ok(RelayFrame::Register { .. }) => {}
            Err(e) => warn!(error = %e, "ignoring malformed relay frame"),
        }
    }

    /// Fails sends queued behind a connection that just went away.
    fn fail_pending(&mut self) {
        while let Ok(Outbound { ack, .. }) = self.rx.try_recv() {
            let _ = ack.send(Err(CoreError::NetworkUnavailable(
                "relay connection dropped".into(),
            )));
        }
    }
}

#[cfg(test)]
#[path = "relay_tests.rs"]
mod tests;
