// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Step Runner (component G): executes one step under a per-attempt
//! deadline and a cooperative abort signal, retrying on timeout, thrown
//! error, or an explicit `RETRY` result, with exponential backoff.

use crate::config::BackoffConfig;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wf_core::{Action, Clock, ErrorCode, IdGen, RunConfig, StepEvent, StepInputs, StepStatus, SystemClock, UlidIdGen};
use wf_store::ArtifactStore;

/// Cooperative cancellation flag for one step attempt. A fresh instance is
/// created per attempt; step bodies are expected to poll `is_aborted`.
#[derive(Clone, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Artifacts produced by (or recovered for) one step, as seen by later
/// steps' `get_inputs`.
#[derive(Debug, Clone, Default)]
pub struct StepArtifacts {
    pub artifact_ids: Vec<String>,
    pub versions: Vec<u64>,
}

/// Everything a step's `get_inputs`/`run` needs, minus the per-attempt
/// abort signal (attached fresh by the runner via [`StepContext::for_attempt`]).
pub struct StepContext<C: Clock = SystemClock, G: IdGen = UlidIdGen> {
    pub run_id: String,
    pub store: Arc<ArtifactStore<C, G>>,
    pub config: RunConfig,
    pub artifacts: Arc<parking_lot::Mutex<std::collections::HashMap<String, StepArtifacts>>>,
    pub repo_hash: Option<String>,
    pub clock: C,
    pub signal: AbortSignal,
}

impl<C: Clock + Clone, G: IdGen> StepContext<C, G> {
    /// Clone this context with a freshly minted abort signal, for one
    /// attempt of the retry loop.
    fn for_attempt(&self, signal: AbortSignal) -> Self {
        Self {
            run_id: self.run_id.clone(),
            store: self.store.clone(),
            config: self.config,
            artifacts: self.artifacts.clone(),
            repo_hash: self.repo_hash.clone(),
            clock: self.clock.clone(),
            signal,
        }
    }
}

/// The result a step body returns: success, a request to retry, or one of
/// the two terminal non-OK outcomes.
#[derive(Debug, Clone)]
pub enum StepRunnerResult {
    Ok {
        artifact_ids: Vec<String>,
        actions: Option<Vec<Action>>,
    },
    Retry {
        error: ErrorCode,
    },
    Blocked {
        artifact_ids: Vec<String>,
        actions: Option<Vec<Action>>,
        error: ErrorCode,
        note: Option<String>,
    },
    Failed {
        artifact_ids: Vec<String>,
        actions: Option<Vec<Action>>,
        error: ErrorCode,
        note: Option<String>,
    },
}

/// An error thrown out of a step body, as opposed to an explicit
/// `StepRunnerResult::Retry`/`Failed`. Classified as `TOOL_ERROR_TRANSIENT`.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// A step's immutable descriptors plus its two operations.
#[async_trait]
pub trait Step<C: Clock = SystemClock, G: IdGen = UlidIdGen>: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn deps(&self) -> &[String];
    fn timeout_ms(&self) -> u64;
    fn max_retries(&self) -> u32;
    fn model(&self) -> &str;
    fn prompt_version(&self) -> &str;
    fn schema_version(&self) -> &str;

    /// Pure, no I/O: the raw inputs this step consumes given the run
    /// context so far.
    fn get_inputs(&self, ctx: &StepContext<C, G>) -> StepInputs;

    /// May suspend; must observe `ctx.signal`; must tolerate being invoked
    /// multiple times with the same fingerprint (idempotent side effects).
    async fn run(&self, ctx: &StepContext<C, G>) -> Result<StepRunnerResult, StepError>;
}

/// Outcome of running one step through its full retry loop: the event
/// trace to persist plus the terminal status/fields.
#[derive(Debug, Clone)]
pub struct RunStepOutcome {
    pub events: Vec<StepEvent>,
    pub status: StepStatus,
    pub artifact_ids: Vec<String>,
    pub actions: Option<Vec<Action>>,
    pub error_code: Option<ErrorCode>,
    pub retry_count: u32,
}

/// Drive one step through STARTED → (retry loop) → a terminal event, per
/// §4.6. `repair_count` stays 0 in this engine stage.
pub async fn run_step<C: Clock + Clone, G: IdGen>(
    step: &(dyn Step<C, G> + Send + Sync),
    ctx: &StepContext<C, G>,
    backoff: &BackoffConfig,
) -> RunStepOutcome {
    let mut events = vec![StepEvent::Started { at: ctx.clock.now_iso() }];
    let mut retry_count = 0u32;

    loop {
        let signal = AbortSignal::new();
        let attempt_ctx = ctx.for_attempt(signal.clone());
        let deadline = Duration::from_millis(step.timeout_ms());

        let attempt = tokio::time::timeout(deadline, step.run(&attempt_ctx)).await;

        // `note` on Blocked/Failed results has no home on RunStepOutcome
        // (it is not part of the persisted StepRecord), so it is dropped
        // here rather than threaded through.
        let to_retry: ErrorCode = match attempt {
            Err(_elapsed) => {
                signal.abort();
                tracing::debug!(step_id = step.id(), retry_count, "step attempt timed out");
                ErrorCode::Timeout
            }
            Ok(Err(e)) => {
                signal.abort();
                tracing::debug!(step_id = step.id(), retry_count, error = %e, "step attempt raised an error");
                ErrorCode::ToolErrorTransient
            }
            Ok(Ok(StepRunnerResult::Ok { artifact_ids, actions })) => {
                events.push(StepEvent::Ok { at: ctx.clock.now_iso() });
                return RunStepOutcome {
                    events,
                    status: StepStatus::Ok,
                    artifact_ids,
                    actions,
                    error_code: None,
                    retry_count,
                };
            }
            Ok(Ok(StepRunnerResult::Retry { error })) if error == ErrorCode::SchemaInvalid => {
                events.push(StepEvent::Blocked { at: ctx.clock.now_iso() });
                return RunStepOutcome {
                    events,
                    status: StepStatus::Blocked,
                    artifact_ids: Vec::new(),
                    actions: None,
                    error_code: Some(ErrorCode::SchemaInvalid),
                    retry_count,
                };
            }
            Ok(Ok(StepRunnerResult::Retry { error })) => {
                signal.abort();
                error
            }
            Ok(Ok(StepRunnerResult::Blocked { artifact_ids, actions, error, note: _ })) => {
                events.push(StepEvent::Blocked { at: ctx.clock.now_iso() });
                return RunStepOutcome {
                    events,
                    status: StepStatus::Blocked,
                    artifact_ids,
                    actions,
                    error_code: Some(error),
                    retry_count,
                };
            }
            Ok(Ok(StepRunnerResult::Failed { artifact_ids, actions, error, note: _ })) => {
                events.push(StepEvent::Failed { at: ctx.clock.now_iso() });
                return RunStepOutcome {
                    events,
                    status: StepStatus::Failed,
                    artifact_ids,
                    actions,
                    error_code: Some(error),
                    retry_count,
                };
            }
        };

        if retry_count < step.max_retries() {
            events.push(StepEvent::Retry {
                at: ctx.clock.now_iso(),
                error: to_retry,
                repair_attempt: None,
            });
            let jitter_sample = rand::random::<f64>() * 2.0 - 1.0;
            let delay = backoff.delay_ms(retry_count, jitter_sample);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            retry_count += 1;
        } else {
            events.push(StepEvent::Failed { at: ctx.clock.now_iso() });
            return RunStepOutcome {
                events,
                status: StepStatus::Failed,
                artifact_ids: Vec::new(),
                actions: None,
                error_code: Some(to_retry),
                retry_count,
            };
        }
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
