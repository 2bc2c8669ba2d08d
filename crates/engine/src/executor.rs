// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Executor Driver (component J): topo-sorts and batches the steps,
//! recovers a resumed writer's in-flight state, then walks each batch
//! skipping idempotent hits and dispatching the rest under a bounded
//! semaphore, halting after the first batch that produces a non-OK step.

use crate::config::BackoffConfig;
use crate::run_writer::RunWriter;
use crate::semaphore::Semaphore;
use crate::step::{run_step, AbortSignal, Step, StepArtifacts};
use crate::topo::{group_into_batches, topo_sort, StepNode};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use wf_core::{
    canonicalize_inputs, inputs_digest, step_instance_id, Action, Clock, ErrorCode, ExecutorError, IdGen,
    PersistedStepResult, RunConfig, RunRecord, RunStatus, StepEvent, StepStatus, StoreMode, SystemClock, UlidIdGen,
    Workflow,
};
use wf_store::{ArtifactStore, FetchOptions, StoreOptions};

/// Per-step execution context, shared with the running step body.
pub use crate::step::StepContext as Context;

const RUNS_WORKSPACE: &str = "runs";
const STEP_RESULT_KIND: &str = "step-result";
const STEP_RESULT_TTL_SECS: i64 = 30 * 24 * 60 * 60;

pub struct ExecuteOptions<C: Clock = SystemClock, G: IdGen = UlidIdGen> {
    pub steps: Vec<Arc<dyn Step<C, G>>>,
    pub store: Arc<ArtifactStore<C, G>>,
    pub clock: C,
    pub owner_id: String,
    pub run_id: String,
    pub workflow: Workflow,
    pub args: HashMap<String, serde_json::Value>,
    pub repo_hash: Option<String>,
    pub config: RunConfig,
    pub backoff: BackoffConfig,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct StepExecutionResult {
    pub step_id: String,
    pub step_instance_id: String,
    pub status: StepStatus,
    pub events: Vec<StepEvent>,
    pub artifact_ids: Vec<String>,
    pub actions: Option<Vec<Action>>,
    pub error_code: Option<ErrorCode>,
}

#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    pub status: RunStatus,
    pub step_results: Vec<StepExecutionResult>,
    pub failed_step: Option<String>,
    pub error_code: Option<ErrorCode>,
}

struct PendingStep<C: Clock, G: IdGen> {
    step: Arc<dyn Step<C, G>>,
    instance_id: String,
}

fn step_result_name(run_id: &str, instance_id: &str) -> String {
    format!("{run_id}-{instance_id}")
}

fn fetch_versions<C: Clock, G: IdGen>(store: &ArtifactStore<C, G>, artifact_ids: &[String]) -> Vec<u64> {
    artifact_ids
        .iter()
        .filter_map(|id| {
            store
                .fetch(FetchOptions { id: Some(id.clone()), ..Default::default() })
                .ok()
                .flatten()
        })
        .map(|a| a.version)
        .collect()
}

async fn recover<C: Clock, G: IdGen>(
    writer: &RunWriter<C, G>,
    store: &ArtifactStore<C, G>,
    run_id: &str,
    run_record: &RunRecord,
    artifacts: &parking_lot::Mutex<HashMap<String, StepArtifacts>>,
) -> Result<(), ExecutorError> {
    for step in &run_record.steps {
        if step.status.is_terminal() {
            let versions = fetch_versions(store, &step.artifact_ids);
            artifacts
                .lock()
                .insert(step.step_id.clone(), StepArtifacts { artifact_ids: step.artifact_ids.clone(), versions });
            continue;
        }

        if step.status == StepStatus::Running {
            let existing = store.fetch(FetchOptions {
                workspace: Some(RUNS_WORKSPACE.to_string()),
                name: Some(step_result_name(run_id, &step.step_instance_id)),
                ..Default::default()
            })?;
            let Some(artifact) = existing else { continue };
            match serde_json::from_value::<PersistedStepResult>(artifact.data.clone()) {
                Ok(persisted) => {
                    writer.record_step_recovered(&step.step_instance_id, &persisted).await?;
                    let versions = fetch_versions(store, &persisted.artifact_ids);
                    artifacts
                        .lock()
                        .insert(step.step_id.clone(), StepArtifacts { artifact_ids: persisted.artifact_ids, versions });
                }
                Err(e) => {
                    tracing::debug!(
                        step_instance_id = %step.step_instance_id,
                        error = %e,
                        "corrupted step-result on recovery, leaving for re-execution",
                    );
                }
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_one<C, G>(
    pending: PendingStep<C, G>,
    store: Arc<ArtifactStore<C, G>>,
    run_id: String,
    config: RunConfig,
    artifacts: Arc<parking_lot::Mutex<HashMap<String, StepArtifacts>>>,
    repo_hash: Option<String>,
    clock: C,
    sem: Arc<Semaphore>,
    backoff: BackoffConfig,
    writer: Arc<RunWriter<C, G>>,
) -> Result<StepExecutionResult, ExecutorError>
where
    C: Clock + Clone,
    G: IdGen,
{
    let _permit = sem.acquire().await;

    let ctx = Context {
        run_id: run_id.clone(),
        store: store.clone(),
        config,
        artifacts: artifacts.clone(),
        repo_hash,
        clock,
        signal: AbortSignal::new(),
    };
    let outcome = run_step(pending.step.as_ref(), &ctx, &backoff).await;

    let persisted = PersistedStepResult {
        status: outcome.status,
        run_id: run_id.clone(),
        artifact_ids: outcome.artifact_ids.clone(),
        actions: outcome.actions.clone(),
        error: outcome.error_code,
        note: None,
    };
    let data = serde_json::to_value(&persisted)
        .map_err(|e| ExecutorError::InvariantViolation(format!("step result not serializable: {e}")))?;
    store.store(StoreOptions {
        workspace: Some(RUNS_WORKSPACE.to_string()),
        name: Some(step_result_name(&run_id, &pending.instance_id)),
        kind: STEP_RESULT_KIND.to_string(),
        data,
        ttl_seconds: Some(Some(STEP_RESULT_TTL_SECS)),
        mode: StoreMode::Replace,
        ..Default::default()
    })?;

    writer
        .record_step_completed(
            &pending.instance_id,
            outcome.status,
            outcome.events.clone(),
            outcome.artifact_ids.clone(),
            outcome.actions.clone(),
            outcome.retry_count,
            0,
            outcome.error_code,
        )
        .await?;

    artifacts.lock().insert(
        pending.step.id().to_string(),
        StepArtifacts { artifact_ids: outcome.artifact_ids.clone(), versions: Vec::new() },
    );

    Ok(StepExecutionResult {
        step_id: pending.step.id().to_string(),
        step_instance_id: pending.instance_id,
        status: outcome.status,
        events: outcome.events,
        artifact_ids: outcome.artifact_ids,
        actions: outcome.actions,
        error_code: outcome.error_code,
    })
}

/// Run every step in `opts.steps` to completion, recovering a resumed
/// writer's in-flight state first and halting after the first batch that
/// produces a non-OK step.
pub async fn execute<C, G>(opts: ExecuteOptions<C, G>) -> Result<ExecuteOutcome, ExecutorError>
where
    C: Clock + Clone,
    G: IdGen,
{
    let nodes: Vec<StepNode> = opts.steps.iter().map(|s| StepNode { id: s.id().to_string(), deps: s.deps().to_vec() }).collect();
    let sorted = topo_sort(&nodes)?;
    let batches = group_into_batches(&sorted, &nodes);

    let steps_by_id: HashMap<String, Arc<dyn Step<C, G>>> = opts.steps.iter().map(|s| (s.id().to_string(), s.clone())).collect();

    let writer = Arc::new(RunWriter::new(
        opts.store.clone(),
        opts.clock.clone(),
        opts.run_id.clone(),
        opts.owner_id.clone(),
        opts.workflow,
        opts.args.clone(),
        opts.repo_hash.clone(),
        opts.config,
    )?);
    let init = writer.init().await?;

    let artifacts: Arc<parking_lot::Mutex<HashMap<String, StepArtifacts>>> = Arc::new(parking_lot::Mutex::new(HashMap::new()));

    if init.is_resume {
        recover(&writer, &opts.store, &opts.run_id, &init.run_record, &artifacts).await?;
    }

    let sem = Arc::new(Semaphore::new(opts.concurrency.max(1))?);
    let mut results: Vec<StepExecutionResult> = Vec::new();
    let mut failed_step: Option<String> = None;
    let mut error_code: Option<ErrorCode> = None;

    for batch in &batches {
        let mut to_run: Vec<PendingStep<C, G>> = Vec::new();
        let mut batch_failed = false;

        for step_id in batch {
            let Some(step) = steps_by_id.get(step_id) else { continue };

            let probe_ctx = Context {
                run_id: opts.run_id.clone(),
                store: opts.store.clone(),
                config: opts.config,
                artifacts: artifacts.clone(),
                repo_hash: opts.repo_hash.clone(),
                clock: opts.clock.clone(),
                signal: AbortSignal::new(),
            };
            let inputs = step.get_inputs(&probe_ctx);
            let canonical = canonicalize_inputs(&inputs).map_err(ExecutorError::InvariantViolation)?;
            let digest = inputs_digest(&canonical);
            let instance_id = step_instance_id(step.id(), &digest, step.model(), step.schema_version(), step.prompt_version());

            let existing = opts.store.fetch(FetchOptions {
                workspace: Some(RUNS_WORKSPACE.to_string()),
                name: Some(step_result_name(&opts.run_id, &instance_id)),
                ..Default::default()
            })?;

            if let Some(artifact) = existing {
                match serde_json::from_value::<PersistedStepResult>(artifact.data.clone()) {
                    Ok(persisted) => {
                        writer.record_step_skipped(step.id(), step.name(), &instance_id, &digest, &persisted).await?;
                        artifacts.lock().insert(
                            step.id().to_string(),
                            StepArtifacts { artifact_ids: persisted.artifact_ids.clone(), versions: Vec::new() },
                        );
                        let status = persisted.status;
                        let error = persisted.error;
                        let at = opts.clock.now_iso();
                        let events = vec![
                            StepEvent::Started { at: at.clone() },
                            StepEvent::Skipped { at: at.clone(), reason: "idempotent".to_string() },
                            crate::run_writer::terminal_event(status, at),
                        ];
                        results.push(StepExecutionResult {
                            step_id: step.id().to_string(),
                            step_instance_id: instance_id,
                            status,
                            events,
                            artifact_ids: persisted.artifact_ids,
                            actions: persisted.actions,
                            error_code: error,
                        });
                        if status != StepStatus::Ok {
                            failed_step = Some(step.id().to_string());
                            error_code = error;
                            batch_failed = true;
                        }
                        continue;
                    }
                    Err(e) => {
                        tracing::debug!(step_id = step.id(), error = %e, "corrupted step-result, re-running");
                    }
                }
            }

            writer.record_step_started(step.id(), step.name(), &instance_id, &digest).await?;
            to_run.push(PendingStep { step: step.clone(), instance_id });
        }

        if !batch_failed && !to_run.is_empty() {
            let dispatch = to_run.into_iter().map(|pending| {
                run_one(
                    pending,
                    opts.store.clone(),
                    opts.run_id.clone(),
                    opts.config,
                    artifacts.clone(),
                    opts.repo_hash.clone(),
                    opts.clock.clone(),
                    sem.clone(),
                    opts.backoff,
                    writer.clone(),
                )
            });
            let outcomes = join_all(dispatch).await;
            for outcome in outcomes {
                let result = outcome?;
                if result.status != StepStatus::Ok {
                    failed_step = Some(result.step_id.clone());
                    error_code = result.error_code;
                }
                results.push(result);
            }
        }

        if failed_step.is_some() {
            break;
        }
    }

    let final_status = match &failed_step {
        Some(id) => {
            let status = results.iter().rev().find(|r| &r.step_id == id).map(|r| r.status).unwrap_or(StepStatus::Failed);
            match status {
                StepStatus::Blocked => RunStatus::Blocked,
                _ => RunStatus::Failed,
            }
        }
        None => RunStatus::Ok,
    };
    let final_error = error_code.map(|e| format!("{e:?}"));

    writer.finalize(final_status, final_error).await?;

    Ok(ExecuteOutcome { status: final_status, step_results: results, failed_step, error_code })
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
