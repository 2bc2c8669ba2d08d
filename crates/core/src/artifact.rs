// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Artifact data model (§3).

use crate::id::ArtifactId;
use serde::{Deserialize, Serialize};

/// A durable, versioned value with optional name, tags, TTL, and text view.
///
/// See the invariants in §3: `(workspace_norm, name_norm)` unique among
/// non-deleted rows, `version` strictly monotonic from 1, `created_at`
/// immutable, `deleted_at` set-once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub id: ArtifactId,

    pub workspace: String,
    pub workspace_norm: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_norm: Option<String>,

    pub kind: String,

    pub data: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,

    /// 1-origin, strictly monotonic per artifact.
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<i64>,
    /// `created_or_updated_at_ms + ttl_seconds * 1000`, recomputed whenever
    /// `ttl_seconds` changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    /// Milliseconds since epoch. Immutable after creation.
    pub created_at: i64,
    /// Milliseconds since epoch. `updated_at >= created_at`.
    pub updated_at: i64,
    /// Milliseconds since epoch. Set once by soft delete, never changed again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl Artifact {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now_ms)
    }
}

/// Ordering column for `list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOrderBy {
    #[default]
    UpdatedAt,
    CreatedAt,
}

/// Collision policy for `store` on the create-or-collide path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    #[default]
    Error,
    Replace,
}

#[cfg(test)]
#[path = "artifact_tests.rs"]
mod tests;
