// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine-wide defaults, gathered in one place per the "global mutable
//! state" design note: callers pass explicit configuration rather than
//! reaching for statics.

/// Default bounded concurrency within a batch.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Retry backoff: `delay = min(base * factor^attempt, max) * (1 + jitter)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub factor: f64,
    /// Symmetric jitter fraction, e.g. `0.25` = ±25%.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 100,
            max_ms: 10_000,
            factor: 2.0,
            jitter: 0.25,
        }
    }
}

impl BackoffConfig {
    /// Compute the delay for a given retry attempt (0-origin), given a
    /// uniform sample in `[-1, 1]` for jitter direction.
    pub fn delay_ms(&self, attempt: u32, jitter_sample: f64) -> u64 {
        let raw = self.base_ms as f64 * self.factor.powi(attempt as i32);
        let capped = raw.min(self.max_ms as f64);
        let jittered = capped * (1.0 + jitter_sample.clamp(-1.0, 1.0) * self.jitter);
        jittered.max(0.0).round() as u64
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
