// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event Fold (component I): re-derive a StepRecord's `status`,
//! `retry_count`, and `repair_count` from its event list. Never touches
//! `error_code` — BLOCKED/FAILED events carry none, and changing the code
//! on fold would need a migration.

use wf_core::{StepEvent, StepRecord, StepStatus};

/// Overwrite `step`'s derived fields from `step.events`, logging any drift
/// from the previously stored values at debug level.
pub fn apply_event_fold(step: &mut StepRecord) {
    let mut status = StepStatus::Pending;
    let mut retry_count = 0u32;
    let mut repair_count = 0u32;

    for event in &step.events {
        match event {
            StepEvent::Started { .. } => status = StepStatus::Running,
            StepEvent::Retry { repair_attempt, .. } => {
                retry_count += 1;
                if repair_attempt.is_some() {
                    repair_count += 1;
                }
            }
            StepEvent::Ok { .. } => status = StepStatus::Ok,
            StepEvent::Blocked { .. } => status = StepStatus::Blocked,
            StepEvent::Failed { .. } => status = StepStatus::Failed,
            // Always followed by a terminal event; carries no status of its own.
            StepEvent::Skipped { .. } => {}
            StepEvent::Recovered { .. } => status = StepStatus::Running,
        }
    }

    if status != step.status || retry_count != step.retry_count || repair_count != step.repair_count {
        tracing::debug!(
            step_instance_id = %step.step_instance_id,
            old_status = ?step.status,
            new_status = ?status,
            old_retry_count = step.retry_count,
            new_retry_count = retry_count,
            old_repair_count = step.repair_count,
            new_repair_count = repair_count,
            "event fold drift",
        );
    }

    step.status = status;
    step.retry_count = retry_count;
    step.repair_count = repair_count;
}

#[cfg(test)]
#[path = "event_fold_tests.rs"]
mod tests;
