// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! wf-engine: the Run Execution Engine (components E–J) — a bounded-
//! concurrency DAG scheduler with per-step retry/timeout handling, a
//! durable run log with optimistic locking, and idempotent skip/recovery.

mod config;
mod event_fold;
mod executor;
mod run_writer;
mod semaphore;
mod step;
mod topo;

pub use config::{BackoffConfig, DEFAULT_CONCURRENCY};
pub use event_fold::apply_event_fold;
pub use executor::{execute, Context, ExecuteOptions, ExecuteOutcome, StepExecutionResult};
pub use run_writer::{RunWriter, RunWriterInit};
pub use semaphore::Semaphore;
pub use step::{run_step, AbortSignal, RunStepOutcome, Step, StepArtifacts, StepContext, StepError, StepRunnerResult};
pub use topo::{group_into_batches, topo_sort, StepNode};
