// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection quality classification with debouncing.
//!
//! Each stats sample is classified healthy or unhealthy against fixed
//! thresholds. A degrade event fires only after `debounce_samples` unhealthy
//! samples in a row, and a recovery event only after the same number of
//! healthy ones, so a single bad sample never flips the call state.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Transport statistics for one sampling interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Round-trip time in milliseconds.
    pub rtt_ms: u32,
    /// Fraction of packets lost, 0.0 to 1.0.
    pub loss_ratio: f64,
    /// True once at least one ICE candidate pair has succeeded.
    #[serde(default)]
    pub candidate_pair_succeeded: bool,
}

/// Thresholds and debounce window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub max_rtt_ms: u32,
    pub max_loss_ratio: f64,
    /// Consecutive consistent samples required before raising an event.
    pub debounce_samples: u32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        QualityThresholds {
            max_rtt_ms: 400,
            max_loss_ratio: 0.05,
            debounce_samples: 3,
        }
    }
}

impl QualityThresholds {
    pub fn is_healthy(&self, stats: &ConnectionStats) -> bool {
        stats.rtt_ms <= self.max_rtt_ms && stats.loss_ratio <= self.max_loss_ratio
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityEvent {
    Degraded,
    Recovered,
}

/// Debounced quality tracker for one call.
#[derive(Debug, Clone)]
pub struct QualityMonitor {
    thresholds: QualityThresholds,
    unhealthy_streak: u32,
    healthy_streak: u32,
    degraded: bool,
}

impl QualityMonitor {
    pub fn new(thresholds: QualityThresholds) -> Self {
        QualityMonitor {
            thresholds,
            unhealthy_streak: 0,
            healthy_streak: 0,
            degraded: false,
        }
    }

    /// Feed one sample. Returns an event when a debounce window completes.
    pub fn observe(&mut self, stats: &ConnectionStats) -> Option<QualityEvent> {
        let window = self.thresholds.debounce_samples.max(1);
        if self.thresholds.is_healthy(stats) {
            self.unhealthy_streak = 0;
            self.healthy_streak = self.healthy_streak.saturating_add(1);
            if self.degraded && self.healthy_streak >= window {
                self.degraded = false;
                return Some(QualityEvent::Recovered);
            }
        } else {
            self.healthy_streak = 0;
            self.unhealthy_streak = self.unhealthy_streak.saturating_add(1);
            if !self.degraded && self.unhealthy_streak >= window {
                self.degraded = true;
                return Some(QualityEvent::Degraded);
            }
        }
        None
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Forget streaks, e.g. after a renegotiation.
    pub fn reset(&mut self) {
        self.unhealthy_streak = 0;
        self.healthy_streak = 0;
        self.degraded = false;
    }
}

/// Source of per-call transport statistics (the media-transport library).
pub trait StatsSource: Send + Sync {
    /// Current stats for a call, or `None` if nothing is available yet.
    fn sample<'a>(
        &'a self,
        call_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<ConnectionStats>> + Send + 'a>>;
}

#[cfg(test)]
#[path = "quality_tests.rs"]
mod tests;
