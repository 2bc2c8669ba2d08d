// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized in-memory index over artifacts, rebuilt from a snapshot
//! plus WAL replay at startup, and kept current by applying each
//! [`ArtifactMutation`] as it is durably appended.

use crate::wal::ArtifactMutation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use wf_core::Artifact;

/// The full in-memory state of the Artifact Store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactIndex {
    /// All rows, including soft-deleted ones, keyed by id.
    rows: HashMap<String, Artifact>,
    /// `(workspace_norm, name_norm) -> id` for the single active
    /// (non-deleted) row holding that key, if any.
    active_by_name: HashMap<(String, String), String>,
}

impl ArtifactIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Artifact> {
        self.rows.get(id)
    }

    pub fn active_id_by_name(&self, workspace_norm: &str, name_norm: &str) -> Option<&str> {
        self.active_by_name
            .get(&(workspace_norm.to_string(), name_norm.to_string()))
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Apply a mutation. Idempotent: re-applying the same `Put` is a no-op
    /// past the first (last write wins, which is itself the replayed
    /// state), and re-applying `SoftDelete` never un-sets or advances an
    /// already-set `deleted_at`.
    pub fn apply(&mut self, mutation: ArtifactMutation) {
        match mutation {
            ArtifactMutation::Put { artifact } => self.apply_put(artifact),
            ArtifactMutation::SoftDelete { id, deleted_at } => {
                self.apply_soft_delete(&id, deleted_at)
            }
        }
    }

    fn apply_put(&mut self, artifact: Artifact) {
        // Clear any stale active-name pointer this id held under a
        // different name before the update (rare, but name is immutable in
        // this engine so this mainly guards replay ordering quirks).
        if let Some(existing) = self.rows.get(&artifact.id.0) {
            if let Some(name_norm) = &existing.name_norm {
                let key = (existing.workspace_norm.clone(), name_norm.clone());
                if self.active_by_name.get(&key) == Some(&artifact.id.0) {
                    self.active_by_name.remove(&key);
                }
            }
        }

        if artifact.deleted_at.is_none() {
            if let Some(name_norm) = &artifact.name_norm {
                self.active_by_name.insert(
                    (artifact.workspace_norm.clone(), name_norm.clone()),
                    artifact.id.0.clone(),
                );
            }
        }

        self.rows.insert(artifact.id.0.clone(), artifact);
    }

    fn apply_soft_delete(&mut self, id: &str, deleted_at: i64) {
        let Some(row) = self.rows.get_mut(id) else {
            return;
        };
        if row.deleted_at.is_some() {
            return;
        }
        row.deleted_at = Some(deleted_at);

        if let Some(name_norm) = &row.name_norm {
            let key = (row.workspace_norm.clone(), name_norm.clone());
            if self.active_by_name.get(&key).map(String::as_str) == Some(id) {
                self.active_by_name.remove(&key);
            }
        }
    }
}

#[cfg(test)]
#[path = "index_tests.rs"]
mod tests;
