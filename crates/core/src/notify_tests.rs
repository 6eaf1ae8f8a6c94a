// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use serde_json::json;

#[test]
fn notification_wire_shape() {
    let n = Notification::CallEnded {
        call_id: "c1".into(),
        reason: EndReason::LocalHangup,
    };
    let value = serde_json::to_value(&n).unwrap();
    assert_eq!(
        value,
        json!({"type": "call-ended", "payload": {"call_id": "c1", "reason": "local-hangup"}})
    );
}

#[test]
fn sync_complete_wire_shape() {
    let n = Notification::SyncComplete(SyncReport {
        succeeded: 2,
        failed: 1,
        remaining: 0,
        rejected: vec![],
    });
    let value = serde_json::to_value(&n).unwrap();
    assert_eq!(value["type"], "sync-complete");
    assert_eq!(value["payload"]["succeeded"], 2);
    assert_eq!(value["payload"]["failed"], 1);
}

#[tokio::test]
async fn channel_notifier_delivers_in_order() {
    let (notifier, mut rx) = ChannelNotifier::new();
    notifier.notify(Notification::CallDegraded { call_id: "a".into() });
    notifier.notify(Notification::CallRecovered { call_id: "a".into() });

    assert!(matches!(
        rx.recv().await,
        Some(Notification::CallDegraded { .. })
    ));
    assert!(matches!(
        rx.recv().await,
        Some(Notification::CallRecovered { .. })
    ));
}

#[test]
fn channel_notifier_ignores_closed_receiver() {
    let (notifier, rx) = ChannelNotifier::new();
    drop(rx);
    notifier.notify(Notification::CallDegraded { call_id: "a".into() });
}
