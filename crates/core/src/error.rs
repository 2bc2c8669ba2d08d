// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-tier error taxonomy: store-level errors and executor-level errors.
//!
//! Store errors never escape into an executor error directly; the executor
//! wraps the store error it received when one is relevant, so the caller of
//! `execute` can always tell which layer the failure originated in.

use thiserror::Error;

/// Errors from the Artifact Store (component C).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArtifactStoreError {
    #[error("version mismatch for artifact {id}: expected {expected}, found {found}")]
    VersionMismatch {
        id: String,
        expected: u64,
        found: u64,
    },
    #[error("name already exists in workspace {workspace}: {name}")]
    NameAlreadyExists { workspace: String, name: String },
    #[error("artifact not found: {addr}")]
    NotFound { addr: String },
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("ambiguous addressing: both id and (workspace, name) supplied")]
    AmbiguousAddressing,
    #[error("data too large for kind {kind}: {len} chars exceeds limit {limit}")]
    DataTooLarge { kind: String, len: usize, limit: usize },
    #[error("text too large: {len} chars exceeds limit {limit}")]
    TextTooLarge { len: usize, limit: usize },
    #[error("compose missing text for artifact {id}")]
    ComposeMissingText { id: String },
}

/// Errors from the Run Execution Engine (components F–J).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("cycle detected among steps: {0:?}")]
    CycleDetected(Vec<String>),
    #[error("step {step} depends on missing step {missing}")]
    MissingDependency { step: String, missing: String },
    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),
    #[error("run {run_id} is owned by a different owner")]
    RunOwnedByOther { run_id: String },
    #[error("run {run_id} has already completed")]
    RunAlreadyComplete { run_id: String },
    #[error("invalid run record for {run_id}: {reason}")]
    InvalidRunRecord { run_id: String, reason: String },
    #[error("step not found: {step_instance_id}")]
    StepNotFound { step_instance_id: String },
    #[error("step definition mismatch for {step_id}: {reason}")]
    StepDefinitionMismatch { step_id: String, reason: String },
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error(transparent)]
    Store(#[from] ArtifactStoreError),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
