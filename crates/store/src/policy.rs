// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TTL & size policy (component D): a thin wrapper over the Artifact Store
//! that applies defaults before delegation.

use wf_core::{ArtifactStoreError, RunStatus};

/// Ephemeral default TTL: 1 hour.
pub const EPHEMERAL_TTL_SECS: i64 = 60 * 60;
/// TTL applied to a run's artifacts once it finishes `OK`: 7 days.
pub const RUN_SUCCESS_TTL_SECS: i64 = 7 * 24 * 60 * 60;
/// Conservative TTL while a run is in flight, and the TTL applied once it
/// finishes `BLOCKED`/`FAILED`: 30 days.
pub const RUN_FAILURE_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Default per-kind size cap on serialized `data`: 200,000 chars.
pub const DEFAULT_SIZE_CAP: usize = 200_000;
/// Size cap for `run-record`: default cap plus headroom (>= 256 KiB).
pub const RUN_RECORD_SIZE_CAP: usize = 256 * 1024;
/// Size cap for `text`, independent of kind.
pub const TEXT_SIZE_CAP: usize = 12_000;

const RUN_RECORD_KIND: &str = "run-record";
const STEP_RESULT_KIND: &str = "step-result";
const RUNS_WORKSPACE: &str = "runs";
const DLQ_WORKSPACE: &str = "dlq";

/// Applies per-workspace TTL defaults and per-kind size caps ahead of a
/// store write.
#[derive(Debug, Clone, Copy, Default)]
pub struct TtlPolicy;

impl TtlPolicy {
    /// Default TTL (seconds) for a workspace when the caller supplies no
    /// `ttl_seconds` at all. `None` means no expiry.
    pub fn default_ttl_for(&self, workspace_norm: &str) -> Option<i64> {
        match workspace_norm {
            RUNS_WORKSPACE => Some(RUN_SUCCESS_TTL_SECS),
            DLQ_WORKSPACE => None,
            _ => Some(EPHEMERAL_TTL_SECS),
        }
    }

    /// Kinds that must carry a positive, finite `ttl_seconds` on every
    /// write.
    pub fn required_ttl_kinds(&self) -> &'static [&'static str] {
        &[RUN_RECORD_KIND, STEP_RESULT_KIND]
    }

    /// Validate a caller-supplied `ttl_seconds` for a kind that requires
    /// one. Returns `Err(INVALID_REQUEST)` for `0`, negative, `NaN`, or
    /// infinite values; the `None` case (omitted) is validated by the
    /// caller before this is reached.
    pub fn validate_required_ttl(&self, kind: &str, ttl_seconds: Option<f64>) -> Result<(), ArtifactStoreError> {
        if !self.required_ttl_kinds().contains(&kind) {
            return Ok(());
        }
        match ttl_seconds {
            Some(v) if v.is_finite() && v > 0.0 => Ok(()),
            _ => Err(ArtifactStoreError::InvalidRequest {
                message: format!("kind {kind} requires a positive finite ttl_seconds"),
            }),
        }
    }

    /// Per-kind size cap on serialized `data`, in chars.
    pub fn size_cap_for(&self, kind: &str) -> usize {
        if kind == RUN_RECORD_KIND {
            RUN_RECORD_SIZE_CAP
        } else {
            DEFAULT_SIZE_CAP
        }
    }

    /// TTL (seconds) to apply to a RunRecord based on its final status.
    pub fn run_record_ttl(&self, status: RunStatus) -> i64 {
        match status {
            RunStatus::Ok => RUN_SUCCESS_TTL_SECS,
            RunStatus::Blocked | RunStatus::Failed => RUN_FAILURE_TTL_SECS,
            RunStatus::Running => RUN_FAILURE_TTL_SECS,
        }
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
