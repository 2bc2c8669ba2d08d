// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction so TTL expiry and retry backoff are testable without
//! real sleeps or wall-clock races.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of the current time, in integer milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since epoch.
    fn now_ms(&self) -> i64;

    /// Current time as an ISO-8601 UTC string with millisecond precision,
    /// used for the RunRecord's own timestamp fields.
    fn now_iso(&self) -> String {
        let ms = self.now_ms();
        let secs = ms.div_euclid(1000);
        let millis = ms.rem_euclid(1000);
        let dt = chrono::DateTime::<chrono::Utc>::from_timestamp(secs, (millis * 1_000_000) as u32)
            .unwrap_or_default();
        dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }
}

/// Production clock backed by the system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Deterministic clock for tests. Starts at an arbitrary fixed instant and
/// only advances when told to.
#[derive(Clone)]
pub struct FakeClock {
    now_ms: Arc<AtomicI64>,
}

impl FakeClock {
    /// Create a fake clock starting at the given time (ms since epoch).
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    /// Advance the clock by `ms` milliseconds.
    pub fn advance(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the clock to an absolute time.
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        // 2024-01-01T00:00:00Z
        Self::new(1_704_067_200_000)
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
