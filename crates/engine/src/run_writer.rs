// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Run Writer (component H): holds the single in-memory RunRecord for
//! one run and serializes every durable update through a single-writer
//! mailbox, realized here as a one-permit [`Semaphore`] rather than a
//! promise chain — same total-order guarantee, idiomatic for this engine's
//! async runtime.

use crate::Semaphore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use wf_core::{
    Action, ArtifactStoreError, Clock, ErrorCode, ExecutorError, IdGen, PersistedStepResult, RunConfig, RunRecord,
    RunStatus, StepEvent, StepRecord, StepStatus, SystemClock, UlidIdGen, Workflow,
};
use wf_store::{ArtifactStore, FetchOptions, StoreOptions, TtlPolicy, RUN_FAILURE_TTL_SECS, RUN_SUCCESS_TTL_SECS};

const RUNS_WORKSPACE: &str = "runs";
const RUN_RECORD_KIND: &str = "run-record";
const STEP_RESULT_KIND: &str = "step-result";

/// Outcome of [`RunWriter::init`].
pub struct RunWriterInit {
    pub run_record: RunRecord,
    pub is_resume: bool,
}

/// Owns the single mutable RunRecord for one run, plus `step_seq` and
/// `current_version` bookkeeping. All mutating operations acquire
/// `writer_lock` first, so they observe a total order matching call order.
pub struct RunWriter<C: Clock = SystemClock, G: IdGen = UlidIdGen> {
    store: Arc<ArtifactStore<C, G>>,
    clock: C,
    owner_id: String,
    run_id: String,
    workflow: Workflow,
    args: HashMap<String, serde_json::Value>,
    repo_hash: Option<String>,
    config: RunConfig,
    record: Mutex<RunRecord>,
    writer_lock: Semaphore,
    step_seq: AtomicU64,
    current_version: AtomicU64,
    policy: TtlPolicy,
}

pub(crate) fn terminal_event(status: StepStatus, at: String) -> StepEvent {
    match status {
        StepStatus::Ok => StepEvent::Ok { at },
        StepStatus::Blocked => StepEvent::Blocked { at },
        _ => StepEvent::Failed { at },
    }
}

impl<C: Clock, G: IdGen> RunWriter<C, G> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ArtifactStore<C, G>>,
        clock: C,
        run_id: String,
        owner_id: String,
        workflow: Workflow,
        args: HashMap<String, serde_json::Value>,
        repo_hash: Option<String>,
        config: RunConfig,
    ) -> Result<Self, ExecutorError> {
        let now = clock.now_iso();
        let placeholder = RunRecord {
            run_id: run_id.clone(),
            owner_id: owner_id.clone(),
            status: RunStatus::Running,
            workflow,
            args: args.clone(),
            repo_hash: repo_hash.clone(),
            config,
            steps: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
            last_error: None,
            resume_from: None,
        };
        Ok(Self {
            store,
            clock,
            owner_id,
            run_id,
            workflow,
            args,
            repo_hash,
            config,
            record: Mutex::new(placeholder),
            writer_lock: Semaphore::new(1)?,
            step_seq: AtomicU64::new(0),
            current_version: AtomicU64::new(0),
            policy: TtlPolicy::default(),
        })
    }

    /// Read the writer's in-memory RunRecord as of its last durable write.
    pub fn current_record(&self) -> RunRecord {
        self.record.lock().clone()
    }

    /// Read the run-record artifact; create it if absent, otherwise
    /// validate ownership/status and restore in-memory bookkeeping.
    pub async fn init(&self) -> Result<RunWriterInit, ExecutorError> {
        let _permit = self.writer_lock.acquire().await;

        let existing = self.store.fetch(FetchOptions {
            workspace: Some(RUNS_WORKSPACE.to_string()),
            name: Some(self.run_id.clone()),
            ..Default::default()
        })?;

        let Some(artifact) = existing else {
            let now = self.clock.now_iso();
            let record = RunRecord {
                run_id: self.run_id.clone(),
                owner_id: self.owner_id.clone(),
                status: RunStatus::Running,
                workflow: self.workflow,
                args: self.args.clone(),
                repo_hash: self.repo_hash.clone(),
                config: self.config,
                steps: Vec::new(),
                created_at: now.clone(),
                updated_at: now,
                last_error: None,
                resume_from: None,
            };
            let data = serde_json::to_value(&record)
                .map_err(|e| ExecutorError::InvariantViolation(format!("run record not serializable: {e}")))?;
            let artifact = self.store.store(StoreOptions {
                workspace: Some(RUNS_WORKSPACE.to_string()),
                name: Some(self.run_id.clone()),
                kind: RUN_RECORD_KIND.to_string(),
                data,
                ttl_seconds: Some(Some(RUN_FAILURE_TTL_SECS)),
                ..Default::default()
            })?;
            self.current_version.store(artifact.version, Ordering::SeqCst);
            *self.record.lock() = record.clone();
            return Ok(RunWriterInit { run_record: record, is_resume: false });
        };

        let mut record: RunRecord = serde_json::from_value(artifact.data.clone()).map_err(|e| {
            ExecutorError::InvalidRunRecord {
                run_id: self.run_id.clone(),
                reason: format!("parse error: {e}"),
            }
        })?;

        if record.owner_id != self.owner_id {
            return Err(ExecutorError::RunOwnedByOther { run_id: self.run_id.clone() });
        }
        if record.status.is_terminal() {
            return Err(ExecutorError::RunAlreadyComplete { run_id: self.run_id.clone() });
        }

        let max_seq = record.steps.iter().map(|s| s.step_seq).max().unwrap_or(0);
        self.step_seq.store(max_seq, Ordering::SeqCst);
        self.current_version.store(artifact.version, Ordering::SeqCst);
        for step in &mut record.steps {
            crate::event_fold::apply_event_fold(step);
        }
        *self.record.lock() = record.clone();

        Ok(RunWriterInit { run_record: record, is_resume: true })
    }

    /// Append a STARTED StepRecord for a fresh step instance; a no-op if
    /// one with the same `step_instance_id` already exists.
    pub async fn record_step_started(&self, step_id: &str, name: &str, step_instance_id: &str, inputs_digest: &str) -> Result<(), ExecutorError> {
        let _permit = self.writer_lock.acquire().await;
        {
            let record = self.record.lock();
            if record.steps.iter().any(|s| s.step_instance_id == step_instance_id) {
                return Ok(());
            }
        }

        let seq = self.step_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let at = self.clock.now_iso();
        let step_id = step_id.to_string();
        let name = name.to_string();
        let step_instance_id = step_instance_id.to_string();
        let inputs_digest = inputs_digest.to_string();

        self.apply_mutation_locked(move |record| {
            record.steps.push(StepRecord {
                step_id: step_id.clone(),
                step_instance_id: step_instance_id.clone(),
                step_seq: seq,
                name: name.clone(),
                status: StepStatus::Running,
                inputs_digest: inputs_digest.clone(),
                schema_version: None,
                events: vec![StepEvent::Started { at: at.clone() }],
                artifact_ids: Vec::new(),
                actions: None,
                retry_count: 0,
                repair_count: 0,
                error_code: None,
                trace: None,
            });
        })
    }

    /// Overwrite the matching StepRecord's terminal fields. Errors with
    /// `StepNotFound` if no StepRecord carries `step_instance_id`.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_step_completed(
        &self,
        step_instance_id: &str,
        status: StepStatus,
        events: Vec<StepEvent>,
        artifact_ids: Vec<String>,
        actions: Option<Vec<Action>>,
        retry_count: u32,
        repair_count: u32,
        error_code: Option<ErrorCode>,
    ) -> Result<(), ExecutorError> {
        let _permit = self.writer_lock.acquire().await;
        {
            let record = self.record.lock();
            let matches = record.steps.iter().filter(|s| s.step_instance_id == step_instance_id).count();
            if matches == 0 {
                return Err(ExecutorError::StepNotFound { step_instance_id: step_instance_id.to_string() });
            }
            if matches > 1 {
                tracing::warn!(step_instance_id, matches, "multiple StepRecords share this step_instance_id");
            }
        }

        let step_instance_id = step_instance_id.to_string();
        self.apply_mutation_locked(move |record| {
            let target_index = record
                .steps
                .iter()
                .position(|s| s.step_instance_id == step_instance_id && s.status == StepStatus::Running)
                .or_else(|| record.steps.iter().position(|s| s.step_instance_id == step_instance_id));
            if let Some(idx) = target_index {
                let target = &mut record.steps[idx];
                target.status = status;
                target.events = events.clone();
                target.artifact_ids = artifact_ids.clone();
                target.actions = actions.clone();
                target.retry_count = retry_count;
                target.repair_count = repair_count;
                target.error_code = error_code;
            }
        })
    }

    /// Append a full `[STARTED, SKIPPED, <terminal>]` StepRecord for an
    /// idempotent hit; a no-op if a terminal StepRecord already exists for
    /// this `step_instance_id`.
    pub async fn record_step_skipped(
        &self,
        step_id: &str,
        name: &str,
        step_instance_id: &str,
        inputs_digest: &str,
        persisted: &PersistedStepResult,
    ) -> Result<(), ExecutorError> {
        let _permit = self.writer_lock.acquire().await;
        {
            let record = self.record.lock();
            if record.steps.iter().any(|s| s.step_instance_id == step_instance_id && s.status.is_terminal()) {
                return Ok(());
            }
        }

        let seq = self.step_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let at = self.clock.now_iso();
        let step_id = step_id.to_string();
        let name = name.to_string();
        let step_instance_id = step_instance_id.to_string();
        let inputs_digest = inputs_digest.to_string();
        let persisted = persisted.clone();

        self.apply_mutation_locked(move |record| {
            record.steps.push(StepRecord {
                step_id: step_id.clone(),
                step_instance_id: step_instance_id.clone(),
                step_seq: seq,
                name: name.clone(),
                status: persisted.status,
                inputs_digest: inputs_digest.clone(),
                schema_version: None,
                events: vec![
                    StepEvent::Started { at: at.clone() },
                    StepEvent::Skipped { at: at.clone(), reason: "idempotent".to_string() },
                    terminal_event(persisted.status, at.clone()),
                ],
                artifact_ids: persisted.artifact_ids.clone(),
                actions: persisted.actions.clone(),
                retry_count: 0,
                repair_count: 0,
                error_code: persisted.error,
                trace: None,
            });
        })
    }

    /// Append `RECOVERED` then the terminal event from `persisted` to an
    /// existing (crash-interrupted) StepRecord.
    pub async fn record_step_recovered(&self, step_instance_id: &str, persisted: &PersistedStepResult) -> Result<(), ExecutorError> {
        let _permit = self.writer_lock.acquire().await;
        {
            let record = self.record.lock();
            if !record.steps.iter().any(|s| s.step_instance_id == step_instance_id) {
                return Err(ExecutorError::StepNotFound { step_instance_id: step_instance_id.to_string() });
            }
        }

        let at = self.clock.now_iso();
        let step_instance_id = step_instance_id.to_string();
        let persisted = persisted.clone();

        self.apply_mutation_locked(move |record| {
            if let Some(target) = record.steps.iter_mut().find(|s| s.step_instance_id == step_instance_id) {
                target.events.push(StepEvent::Recovered { at: at.clone() });
                target.events.push(terminal_event(persisted.status, at.clone()));
                target.status = persisted.status;
                target.artifact_ids = persisted.artifact_ids.clone();
                target.actions = persisted.actions.clone();
                target.error_code = persisted.error;
            }
        })
    }

    /// Set the run's final status and write with the status-appropriate
    /// TTL; on `OK`, realign every terminal step-result artifact's TTL to
    /// the run-success value.
    pub async fn finalize(&self, status: RunStatus, last_error: Option<String>) -> Result<(), ExecutorError> {
        let _permit = self.writer_lock.acquire().await;
        self.apply_mutation_locked(move |record| {
            record.status = status;
            record.last_error = last_error.clone();
        })?;

        if status == RunStatus::Ok {
            self.realign_step_result_ttls()?;
        }
        Ok(())
    }

    fn realign_step_result_ttls(&self) -> Result<(), ExecutorError> {
        let record = self.record.lock().clone();
        for step in record.steps.iter().filter(|s| s.status.is_terminal()) {
            let persisted = PersistedStepResult {
                status: step.status,
                run_id: self.run_id.clone(),
                artifact_ids: step.artifact_ids.clone(),
                actions: step.actions.clone(),
                error: step.error_code,
                note: None,
            };
            let data = serde_json::to_value(&persisted)
                .map_err(|e| ExecutorError::InvariantViolation(format!("step result not serializable: {e}")))?;
            self.store.store(StoreOptions {
                workspace: Some(RUNS_WORKSPACE.to_string()),
                name: Some(format!("{}-{}", self.run_id, step.step_instance_id)),
                kind: STEP_RESULT_KIND.to_string(),
                data,
                ttl_seconds: Some(Some(RUN_SUCCESS_TTL_SECS)),
                mode: wf_core::StoreMode::Replace,
                ..Default::default()
            })?;
        }
        Ok(())
    }

    /// Clone the record, apply `mutate`, and write it back with the
    /// currently-known `expected_version`. On a conflicting write, reload
    /// the artifact once, re-check invariants, replay the mutation, and
    /// re-write; a second conflict surfaces as `INVALID_RUN_RECORD`.
    fn apply_mutation_locked<F>(&self, mutate: F) -> Result<(), ExecutorError>
    where
        F: Fn(&mut RunRecord),
    {
        let mut record = self.record.lock().clone();
        mutate(&mut record);
        record.updated_at = self.clock.now_iso();
        let ttl = self.policy.run_record_ttl(record.status);
        let expected = self.current_version.load(Ordering::SeqCst);

        let data = serde_json::to_value(&record)
            .map_err(|e| ExecutorError::InvariantViolation(format!("run record not serializable: {e}")))?;

        let result = self.store.store(StoreOptions {
            workspace: Some(RUNS_WORKSPACE.to_string()),
            name: Some(self.run_id.clone()),
            kind: RUN_RECORD_KIND.to_string(),
            data,
            expected_version: Some(expected),
            ttl_seconds: Some(Some(ttl)),
            mode: wf_core::StoreMode::Replace,
            ..Default::default()
        });

        match result {
            Ok(artifact) => {
                self.current_version.store(artifact.version, Ordering::SeqCst);
                *self.record.lock() = record;
                Ok(())
            }
            Err(ArtifactStoreError::VersionMismatch { .. }) => self.reload_and_retry(mutate),
            Err(e) => Err(ExecutorError::Store(e)),
        }
    }

    fn reload_and_retry<F>(&self, mutate: F) -> Result<(), ExecutorError>
    where
        F: Fn(&mut RunRecord),
    {
        let artifact = self
            .store
            .fetch(FetchOptions {
                workspace: Some(RUNS_WORKSPACE.to_string()),
                name: Some(self.run_id.clone()),
                ..Default::default()
            })?
            .ok_or_else(|| ExecutorError::InvalidRunRecord {
                run_id: self.run_id.clone(),
                reason: "run record vanished on reload".to_string(),
            })?;
        let mut record: RunRecord = serde_json::from_value(artifact.data.clone()).map_err(|e| {
            ExecutorError::InvalidRunRecord {
                run_id: self.run_id.clone(),
                reason: format!("reload parse error: {e}"),
            }
        })?;

        if record.owner_id != self.owner_id {
            return Err(ExecutorError::RunOwnedByOther { run_id: self.run_id.clone() });
        }
        if record.status.is_terminal() {
            return Err(ExecutorError::RunAlreadyComplete { run_id: self.run_id.clone() });
        }

        mutate(&mut record);
        record.updated_at = self.clock.now_iso();
        let ttl = self.policy.run_record_ttl(record.status);

        let data = serde_json::to_value(&record)
            .map_err(|e| ExecutorError::InvariantViolation(format!("run record not serializable: {e}")))?;

        let result = self.store.store(StoreOptions {
            workspace: Some(RUNS_WORKSPACE.to_string()),
            name: Some(self.run_id.clone()),
            kind: RUN_RECORD_KIND.to_string(),
            data,
            expected_version: Some(artifact.version),
            ttl_seconds: Some(Some(ttl)),
            mode: wf_core::StoreMode::Replace,
            ..Default::default()
        });

        match result {
            Ok(a) => {
                self.current_version.store(a.version, Ordering::SeqCst);
                *self.record.lock() = record;
                Ok(())
            }
            Err(ArtifactStoreError::VersionMismatch { .. }) => Err(ExecutorError::InvalidRunRecord {
                run_id: self.run_id.clone(),
                reason: "version mismatch persisted after reload-and-retry".to_string(),
            }),
            Err(e) => Err(ExecutorError::Store(e)),
        }
    }
}

#[cfg(test)]
#[path = "run_writer_tests.rs"]
mod tests;
