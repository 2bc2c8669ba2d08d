// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! wf-store: the durable, optimistic-concurrency-controlled Artifact Store
//! (component C) and its TTL/size policy layer (component D).

mod checkpoint;
mod index;
mod policy;
mod snapshot;
mod store;
mod wal;

pub use checkpoint::{CheckpointError, CheckpointResult, Checkpointer, FsCheckpointWriter};
pub use index::ArtifactIndex;
pub use policy::{
    TtlPolicy, DEFAULT_SIZE_CAP, EPHEMERAL_TTL_SECS, RUN_FAILURE_TTL_SECS, RUN_RECORD_SIZE_CAP,
    RUN_SUCCESS_TTL_SECS, TEXT_SIZE_CAP,
};
pub use snapshot::{Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
pub use store::{
    ArtifactStore, ComposeFormat, ComposeItem, ComposeOptions, ComposeResult, DeleteOptions,
    FetchOptions, ListOptions, ListResult, StoreOptions,
};
pub use wal::{ArtifactMutation, Wal, WalEntry, WalError};
