// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use yare::parameterized;

#[parameterized(
    network = { Error::NetworkUnavailable("offline".into()), "offline" },
    rejected = { Error::ApplicationRejected { status: 409, message: "conflict".into() }, "409" },
    timeout = { Error::SignalingTimeout { call_id: "call-7".into() }, "call-7" },
    corrupt = { Error::StorageCorrupt("bad header".into()), "bad header" },
)]
fn error_display_contains(err: Error, expected: &str) {
    assert!(err.to_string().contains(expected));
}

#[test]
fn only_network_unavailable_is_transient() {
    assert!(Error::NetworkUnavailable("x".into()).is_transient());
    assert!(!Error::ApplicationRejected {
        status: 500,
        message: String::new()
    }
    .is_transient());
    assert!(!Error::TransportFatal("x".into()).is_transient());
}

#[test]
fn error_from_json() {
    let json_err = serde_json::from_str::<()>("invalid").unwrap_err();
    let err: Error = json_err.into();
    assert!(matches!(err, Error::Json(_)));
}
