// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Exponential backoff shared by queue replay and signaling sends.

use std::time::Duration;

/// Doubling delay with a ceiling.
///
/// Attempt 1 waits `initial`, attempt 2 waits `2 * initial`, and so on until
/// `max` is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Backoff {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay to wait before the given attempt (1-based). Attempt 0 waits nothing.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let shift = (attempt - 1).min(31);
        self.initial
            .checked_mul(1u32 << shift)
            .map_or(self.max, |d| d.min(self.max))
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
