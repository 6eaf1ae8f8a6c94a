// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Environment variables read by the daemon.

use std::path::PathBuf;

/// Generated environment variable name constants.
pub mod names {
    include!(concat!(env!("OUT_DIR"), "/env_names.rs"));
}

/// Returns the value of `LIFELINE_STATE_DIR` if set.
pub fn state_dir() -> Option<PathBuf> {
    std::env::var(names::LIFELINE_STATE_DIR)
        .ok()
        .map(PathBuf::from)
}

/// Returns the value of `LIFELINE_CONFIG` if set.
pub fn config_path() -> Option<PathBuf> {
    std::env::var(names::LIFELINE_CONFIG).ok().map(PathBuf::from)
}

/// Returns the value of `XDG_STATE_HOME` if set.
pub fn xdg_state_home() -> Option<PathBuf> {
    std::env::var(names::XDG_STATE_HOME).ok().map(PathBuf::from)
}

/// Resolves the state directory: explicit flag, then `LIFELINE_STATE_DIR`,
/// then `$XDG_STATE_HOME/lifeline`, then `~/.local/state/lifeline`.
pub fn resolve_state_dir(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag.or_else(state_dir) {
        return dir;
    }
    if let Some(dir) = xdg_state_home() {
        return dir.join("lifeline");
    }
    dirs::home_dir()
        .map(|h| h.join(".local/state/lifeline"))
        .unwrap_or_else(|| PathBuf::from(".local/state/lifeline"))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
