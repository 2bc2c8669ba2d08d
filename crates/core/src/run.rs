// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RunRecord, StepRecord, StepEvent and PersistedStepResult (§3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Ok,
    Blocked,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Workflow tag carried by a RunRecord.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    Plan,
    Feat,
    Fix,
}

/// Status of a single step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Ok,
    Retrying,
    Blocked,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Ok | StepStatus::Blocked | StepStatus::Failed)
    }
}

/// The closed set of error codes used throughout (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Timeout,
    SchemaInvalid,
    ToolErrorTransient,
    ToolErrorPermanent,
    RateLimit,
    Thrashing,
    HumanRequired,
}

/// Kind of filesystem or external operation an action performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOp {
    Edit,
    Create,
    Delete,
    External,
}

/// An opaque action record, passed through unchanged by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_id: String,
    pub path: String,
    pub op: ActionOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
}

/// A tagged, point-in-time transition in a step's lifecycle, in RunRecord's
/// own ISO-8601-millisecond timestamp convention (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEvent {
    Started {
        at: String,
    },
    Retry {
        at: String,
        error: ErrorCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repair_attempt: Option<u32>,
    },
    Ok {
        at: String,
    },
    Blocked {
        at: String,
    },
    Failed {
        at: String,
    },
    /// Inserted between STARTED and a terminal event on an idempotent hit.
    Skipped {
        at: String,
        reason: String,
    },
    /// Inserted before the terminal event on crash recovery.
    Recovered {
        at: String,
    },
}

impl StepEvent {
    pub fn at(&self) -> &str {
        match self {
            StepEvent::Started { at }
            | StepEvent::Retry { at, .. }
            | StepEvent::Ok { at }
            | StepEvent::Blocked { at }
            | StepEvent::Failed { at }
            | StepEvent::Skipped { at, .. }
            | StepEvent::Recovered { at } => at,
        }
    }
}

/// One step's lifecycle inside a RunRecord.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    /// Fingerprint, 64-hex.
    pub step_instance_id: String,
    /// Monotonic within run, assigned at first durable write.
    pub step_seq: u64,
    pub name: String,
    pub status: StepStatus,
    pub inputs_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(default)]
    pub events: Vec<StepEvent>,
    #[serde(default)]
    pub artifact_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Action>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub repair_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// Per-run configuration, explicit rather than global mutable state (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub rounds: u32,
    pub retries: u32,
    pub timeout_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            rounds: 2,
            retries: 2,
            timeout_ms: 60_000,
        }
    }
}

/// The single durable log of one workflow run, stored as an artifact in
/// workspace `runs`, name = `run_id`, kind `run-record`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub owner_id: String,
    pub status: RunStatus,
    pub workflow: Workflow,
    #[serde(default)]
    pub args: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_hash: Option<String>,
    pub config: RunConfig,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_from: Option<String>,
}

/// The terminal-only artifact recorded for idempotent skip, stored as kind
/// `step-result` in workspace `runs`, name `"{run_id}-{step_instance_id}"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedStepResult {
    /// One of OK, BLOCKED, FAILED. RETRY is never persisted.
    pub status: StepStatus,
    pub run_id: String,
    #[serde(default)]
    pub artifact_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Action>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
