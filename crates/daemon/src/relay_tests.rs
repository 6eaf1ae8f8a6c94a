// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use super::*;
use std::time::Duration;
use tokio::net::TcpListener;

type ServerSocket = WebSocketStream<TcpStream>;

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn next_frame(socket: &mut ServerSocket) -> RelayFrame {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap()
        {
            Some(Ok(Message::Text(text))) => return RelayFrame::from_json(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("unexpected relay input: {other:?}"),
        }
    }
}

fn fast_backoff() -> Backoff {
    Backoff::new(Duration::from_millis(10), Duration::from_millis(50))
}

#[test]
fn frame_wire_format() {
    let frame = RelayFrame::Signal {
        peer: "bob".into(),
        message: SignalMessage::Hangup {
            call_id: "c1".into(),
        },
    };
    assert_eq!(
        frame.to_json().unwrap(),
        r#"{"kind":"signal","peer":"bob","message":{"type":"hangup","call_id":"c1"}}"#
    );
    let register = RelayFrame::from_json(r#"{"kind":"register","peer_id":"alice"}"#).unwrap();
    assert_eq!(
        register,
        RelayFrame::Register {
            peer_id: "alice".into()
        }
    );
}

#[tokio::test]
async fn send_fails_fast_while_disconnected() {
    let (signaling, _client, _inbound) = channel("ws://127.0.0.1:9", "alice", fast_backoff());
    let err = signaling
        .send(
            "bob",
            SignalMessage::Hangup {
                call_id: "c1".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn registers_then_exchanges_signals() {
    let (listener, url) = listen().await;
    let (signaling, client, mut inbound) = channel(url, "alice", fast_backoff());
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(client.run(shutdown.clone()));

    let mut server = accept(&listener).await;
    assert_eq!(
        next_frame(&mut server).await,
        RelayFrame::Register {
            peer_id: "alice".into()
        }
    );
    assert!(signaling.is_connected());

    let offer = SignalMessage::Offer {
        call_id: "c1".into(),
        sdp: "v=0".into(),
    };
    signaling.send("bob", offer.clone()).await.unwrap();
    assert_eq!(
        next_frame(&mut server).await,
        RelayFrame::Signal {
            peer: "bob".into(),
            message: offer
        }
    );

    let answer = SignalMessage::Answer {
        call_id: "c1".into(),
        sdp: "v=0 answer".into(),
    };
    let frame = RelayFrame::Signal {
        peer: "bob".into(),
        message: answer.clone(),
    };
    server
        .send(Message::Text(frame.to_json().unwrap().into()))
        .await
        .unwrap();
    server
        .send(Message::Text("{\"kind\":\"mystery\"}".into()))
        .await
        .unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        received,
        InboundSignal {
            sender: "bob".into(),
            message: answer
        }
    );

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(!signaling.is_connected());
}

#[tokio::test]
async fn reconnects_after_server_drops_connection() {
    let (listener, url) = listen().await;
    let (signaling, client, _inbound) = channel(url, "alice", fast_backoff());
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(client.run(shutdown.clone()));

    let mut first = accept(&listener).await;
    next_frame(&mut first).await;
    first.close(None).await.unwrap();
    drop(first);

    let mut second = accept(&listener).await;
    assert_eq!(
        next_frame(&mut second).await,
        RelayFrame::Register {
            peer_id: "alice".into()
        }
    );
    signaling
        .send(
            "bob",
            SignalMessage::Reject {
                call_id: "c2".into(),
            },
        )
        .await
        .unwrap();
    assert!(matches!(
        next_frame(&mut second).await,
        RelayFrame::Signal { .. }
    ));

    shutdown.cancel();
    task.await.unwrap();
}
