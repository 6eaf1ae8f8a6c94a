// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for lifeline-core operations.

use thiserror::Error;

/// All possible errors that can occur in lifeline-core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The network could not be reached. Transient: triggers queueing and backoff.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The remote endpoint was reachable but refused the request.
    #[error("request rejected with status {status}: {message}")]
    ApplicationRejected { status: u16, message: String },

    #[error("signaling timed out for call {call_id}")]
    SignalingTimeout { call_id: String },

    #[error("transport failure: {0}")]
    TransportFatal(String),

    #[error("storage corrupt: {0}")]
    StorageCorrupt(String),

    #[error("invalid call state transition: cannot go from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("call not found: {0}")]
    CallNotFound(String),

    #[error("queued action not found: {0}")]
    ActionNotFound(u64),

    #[error("{0}")]
    InvalidInput(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Returns true for errors that should be retried locally rather than surfaced.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NetworkUnavailable(_))
    }
}

/// A specialized Result type for lifeline-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
