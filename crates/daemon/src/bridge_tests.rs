// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;

fn stats(rtt_ms: u32) -> ConnectionStats {
    ConnectionStats {
        rtt_ms,
        loss_ratio: 0.0,
        candidate_pair_succeeded: true,
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<DaemonEvent> {
    let mut events = Vec::new();
    while let Ok(line) = rx.try_recv() {
        events.push(serde_json::from_str(&line).unwrap());
    }
    events
}

#[tokio::test]
async fn samples_are_consumed_once() {
    let latest = LatestStats::default();
    latest.record("c1", stats(10));
    latest.record("c1", stats(20));
    assert_eq!(latest.sample("c1").await, Some(stats(20)));
    assert_eq!(latest.sample("c1").await, None);
    assert_eq!(latest.sample("c2").await, None);
}

#[test]
fn host_media_emits_media_events_in_order() {
    let (outbox, mut rx) = Outbox::new();
    let latest = Arc::new(LatestStats::default());
    latest.record("c1", stats(10));
    let media = HostMedia::new(outbox, latest.clone());

    media.apply_remote_description("c1", "v=0").unwrap();
    media.add_remote_candidate("c1", "candidate:1").unwrap();
    media.release("c1");

    assert_eq!(
        drain(&mut rx),
        vec![
            DaemonEvent::Media(MediaAction::ApplyRemoteDescription {
                call_id: "c1".into(),
                sdp: "v=0".into()
            }),
            DaemonEvent::Media(MediaAction::AddRemoteCandidate {
                call_id: "c1".into(),
                candidate: "candidate:1".into()
            }),
            DaemonEvent::Media(MediaAction::Release {
                call_id: "c1".into()
            }),
        ]
    );
    assert!(latest.take("c1").is_none(), "release forgets pending stats");
}

#[tokio::test]
async fn write_lines_terminates_each_event() {
    let (outbox, rx) = Outbox::new();
    outbox.emit(&DaemonEvent::Ready {
        version: "1.2.3".into(),
    });
    outbox.emit(&DaemonEvent::success(Some(1), serde_json::Value::Null));
    drop(outbox);

    let mut out = Vec::new();
    write_lines(rx, &mut out).await.unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            r#"{"event":"ready","version":"1.2.3"}"#,
            r#"{"event":"reply","id":1,"ok":true}"#,
        ]
    );
}
